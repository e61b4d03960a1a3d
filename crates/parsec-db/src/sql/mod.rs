//! PostgreSQL-backed datamodel (spec.md §4.9).
//!
//! Append-only child collections (role history, key rotations, profile
//! updates, vlob versions) are stored as `jsonb` columns and read back
//! whole, mirroring how the organization-scoped aggregates are always
//! loaded in the in-memory backend. Certificate/vlob writes additionally
//! take a `pg_advisory_xact_lock` inside the transaction so that more than
//! one server process can run against the same database safely; the
//! in-process `LockTable` from [`crate::locks`] still guards against races
//! within a single process before that transaction even opens.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::info;

use parsec_crypto::VerifyKey;
use parsec_types::{
    DeviceId, InvitationStatus, InvitationToken, InvitationType, OrganizationId, RealmId,
    RealmRole, SequesterServiceId, SequesterServiceType, Timestamp, UserId, UserProfile, VlobId,
};

use crate::datamodel::Datamodel;
use crate::error::{DbError, DbResult};
use crate::locks::{LockGuard, LockTable, LockTopic};
use crate::model::{
    AccountVaultStrategy, ActiveUsersLimit, AllowedClientAgent, Block, Device, Invitation,
    KeyRotationEntry, Organization, ProfileUpdate, Realm, RealmUserRoleEntry, SequesterAuthority,
    SequesterService, TosUrls, User, Vlob, VlobVersion,
};

/// PostgreSQL implementation of [`Datamodel`].
#[derive(Clone)]
pub struct SqlDatamodel {
    pool: PgPool,
    locks: std::sync::Arc<LockTable>,
}

impl SqlDatamodel {
    pub async fn connect(database_url: &str, max_connections: u32) -> DbResult<Self> {
        info!("connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        info!("connected to PostgreSQL");
        Ok(Self {
            pool,
            locks: std::sync::Arc::new(LockTable::new()),
        })
    }

    pub async fn migrate(&self) -> DbResult<()> {
        info!("running migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// -- jsonb (de)serialization helpers --------------------------------------
//
// Hand-rolled rather than derived `Serialize`/`Deserialize` because
// `VlobVersion::sequester_blob` is keyed by `SequesterServiceId`, which
// serializes as raw bytes: `serde_json` only accepts string map keys, so
// a blanket derive would panic the moment a sequestered vlob got written.

fn profile_updates_to_json(updates: &[ProfileUpdate]) -> Value {
    Value::Array(
        updates
            .iter()
            .map(|u| json!({"profile": profile_to_str(u.profile), "timestamp": u.timestamp.as_wire_seconds()}))
            .collect(),
    )
}

fn profile_updates_from_json(value: Value) -> DbResult<Vec<ProfileUpdate>> {
    let arr = value.as_array().cloned().unwrap_or_default();
    arr.into_iter()
        .map(|v| {
            Ok(ProfileUpdate {
                profile: profile_from_str(v["profile"].as_str().unwrap_or("standard"))?,
                timestamp: Timestamp::from_wire_seconds(v["timestamp"].as_f64().unwrap_or(0.0)),
            })
        })
        .collect()
}

fn profile_to_str(p: UserProfile) -> &'static str {
    match p {
        UserProfile::Admin => "admin",
        UserProfile::Standard => "standard",
        UserProfile::Outsider => "outsider",
    }
}

fn profile_from_str(s: &str) -> DbResult<UserProfile> {
    Ok(match s {
        "admin" => UserProfile::Admin,
        "outsider" => UserProfile::Outsider,
        _ => UserProfile::Standard,
    })
}

fn role_to_str(r: Option<RealmRole>) -> &'static str {
    match r {
        None => "none",
        Some(RealmRole::Reader) => "reader",
        Some(RealmRole::Contributor) => "contributor",
        Some(RealmRole::Manager) => "manager",
        Some(RealmRole::Owner) => "owner",
    }
}

fn role_from_str(s: &str) -> Option<RealmRole> {
    match s {
        "reader" => Some(RealmRole::Reader),
        "contributor" => Some(RealmRole::Contributor),
        "manager" => Some(RealmRole::Manager),
        "owner" => Some(RealmRole::Owner),
        _ => None,
    }
}

fn roles_to_json(roles: &[RealmUserRoleEntry]) -> Value {
    Value::Array(
        roles
            .iter()
            .map(|r| {
                json!({
                    "user_id": r.user_id.to_hex(),
                    "role": role_to_str(r.role),
                    "certificate": hex::encode(&r.certificate),
                    "granted_by_user": r.granted_by.user_id.to_hex(),
                    "granted_by_device": r.granted_by.device_name,
                    "timestamp": r.timestamp.as_wire_seconds(),
                })
            })
            .collect(),
    )
}

fn roles_from_json(value: Value) -> DbResult<Vec<RealmUserRoleEntry>> {
    let arr = value.as_array().cloned().unwrap_or_default();
    arr.into_iter()
        .map(|v| {
            Ok(RealmUserRoleEntry {
                user_id: UserId::from_hex(v["user_id"].as_str().unwrap_or_default())
                    .map_err(|e| DbError::Serialization(e.to_string()))?,
                role: role_from_str(v["role"].as_str().unwrap_or("none")),
                certificate: hex::decode(v["certificate"].as_str().unwrap_or_default())
                    .map_err(|e| DbError::Serialization(e.to_string()))?,
                granted_by: DeviceId::new(
                    UserId::from_hex(v["granted_by_user"].as_str().unwrap_or_default())
                        .map_err(|e| DbError::Serialization(e.to_string()))?,
                    v["granted_by_device"].as_str().unwrap_or_default(),
                ),
                timestamp: Timestamp::from_wire_seconds(v["timestamp"].as_f64().unwrap_or(0.0)),
            })
        })
        .collect()
}

fn key_rotations_to_json(entries: &[KeyRotationEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| {
                json!({
                    "key_index": e.key_index,
                    "certificate": hex::encode(&e.certificate),
                    "timestamp": e.timestamp.as_wire_seconds(),
                })
            })
            .collect(),
    )
}

fn key_rotations_from_json(value: Value) -> DbResult<Vec<KeyRotationEntry>> {
    let arr = value.as_array().cloned().unwrap_or_default();
    arr.into_iter()
        .map(|v| {
            Ok(KeyRotationEntry {
                key_index: v["key_index"].as_u64().unwrap_or(0) as u32,
                certificate: hex::decode(v["certificate"].as_str().unwrap_or_default())
                    .map_err(|e| DbError::Serialization(e.to_string()))?,
                timestamp: Timestamp::from_wire_seconds(v["timestamp"].as_f64().unwrap_or(0.0)),
            })
        })
        .collect()
}

fn versions_to_json(versions: &[VlobVersion]) -> Value {
    Value::Array(
        versions
            .iter()
            .map(|v| {
                let sequester_blob = v.sequester_blob.as_ref().map(|map| {
                    Value::Object(
                        map.iter()
                            .map(|(k, blob)| (k.to_hex(), Value::String(hex::encode(blob))))
                            .collect(),
                    )
                });
                json!({
                    "version": v.version,
                    "blob": hex::encode(&v.blob),
                    "author_user": v.author.user_id.to_hex(),
                    "author_device": v.author.device_name,
                    "timestamp": v.timestamp.as_wire_seconds(),
                    "key_index": v.key_index,
                    "sequester_blob": sequester_blob,
                })
            })
            .collect(),
    )
}

fn versions_from_json(value: Value) -> DbResult<Vec<VlobVersion>> {
    let arr = value.as_array().cloned().unwrap_or_default();
    arr.into_iter()
        .map(|v| {
            let sequester_blob = match v.get("sequester_blob").and_then(|s| s.as_object()) {
                None => None,
                Some(obj) => {
                    let mut map = BTreeMap::new();
                    for (k, val) in obj {
                        let id = SequesterServiceId::from_hex(k)
                            .map_err(|e| DbError::Serialization(e.to_string()))?;
                        let blob = hex::decode(val.as_str().unwrap_or_default())
                            .map_err(|e| DbError::Serialization(e.to_string()))?;
                        map.insert(id, blob);
                    }
                    Some(map)
                }
            };
            Ok(VlobVersion {
                version: v["version"].as_u64().unwrap_or(0) as u32,
                blob: hex::decode(v["blob"].as_str().unwrap_or_default())
                    .map_err(|e| DbError::Serialization(e.to_string()))?,
                author: DeviceId::new(
                    UserId::from_hex(v["author_user"].as_str().unwrap_or_default())
                        .map_err(|e| DbError::Serialization(e.to_string()))?,
                    v["author_device"].as_str().unwrap_or_default(),
                ),
                timestamp: Timestamp::from_wire_seconds(v["timestamp"].as_f64().unwrap_or(0.0)),
                key_index: v["key_index"].as_u64().unwrap_or(0) as u32,
                sequester_blob,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl Datamodel for SqlDatamodel {
    async fn get_organization(&self, org: &OrganizationId) -> DbResult<Option<Organization>> {
        let row = sqlx::query(
            r#"
            SELECT id, root_verify_key, is_expired, bootstrap_token, active_users_limit,
                   user_profile_outsider_allowed, minimum_archiving_period, allowed_client_agent,
                   account_vault_strategy, sequester_authority, tos, last_certificate_timestamp
            FROM organizations WHERE id = $1
            "#,
        )
        .bind(org.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let root_verify_key: Option<Vec<u8>> = row.try_get("root_verify_key")?;
        let sequester_authority: Option<Value> = row.try_get("sequester_authority")?;
        let tos: Option<Value> = row.try_get("tos")?;
        let active_users_limit: Option<i64> = row.try_get("active_users_limit")?;
        let allowed_client_agent: String = row.try_get("allowed_client_agent")?;
        let account_vault_strategy: String = row.try_get("account_vault_strategy")?;
        let last_certificate_timestamp: Option<f64> = row.try_get("last_certificate_timestamp")?;

        Ok(Some(Organization {
            id: org.clone(),
            root_verify_key: root_verify_key.map(verify_key_from_vec).transpose()?,
            is_expired: row.try_get("is_expired")?,
            bootstrap_token: row.try_get("bootstrap_token")?,
            active_users_limit: match active_users_limit {
                Some(n) => ActiveUsersLimit::Limited(n as u64),
                None => ActiveUsersLimit::Unbounded,
            },
            user_profile_outsider_allowed: row.try_get("user_profile_outsider_allowed")?,
            minimum_archiving_period: row.try_get("minimum_archiving_period")?,
            allowed_client_agent: if allowed_client_agent == "native_only" {
                AllowedClientAgent::NativeOnly
            } else {
                AllowedClientAgent::NativeOrWeb
            },
            account_vault_strategy: if account_vault_strategy == "forbidden" {
                AccountVaultStrategy::Forbidden
            } else {
                AccountVaultStrategy::Allowed
            },
            sequester_authority: sequester_authority.map(|v| SequesterAuthority {
                verify_key_der: hex::decode(v["verify_key_der"].as_str().unwrap_or_default())
                    .unwrap_or_default(),
                created_on: Timestamp::from_wire_seconds(v["created_on"].as_f64().unwrap_or(0.0)),
            }),
            tos: tos.map(|v| TosUrls {
                per_locale: v["per_locale"]
                    .as_object()
                    .map(|o| {
                        o.iter()
                            .map(|(k, val)| (k.clone(), val.as_str().unwrap_or_default().to_string()))
                            .collect()
                    })
                    .unwrap_or_default(),
                updated_on: Timestamp::from_wire_seconds(v["updated_on"].as_f64().unwrap_or(0.0)),
            }),
            last_certificate_timestamp: last_certificate_timestamp.map(Timestamp::from_wire_seconds),
        }))
    }

    async fn insert_organization(&self, org: Organization) -> DbResult<()> {
        let active_users_limit: Option<i64> = match org.active_users_limit {
            ActiveUsersLimit::Unbounded => None,
            ActiveUsersLimit::Limited(n) => Some(n as i64),
        };
        let result = sqlx::query(
            r#"
            INSERT INTO organizations (id, is_expired, bootstrap_token, active_users_limit,
                user_profile_outsider_allowed, minimum_archiving_period, allowed_client_agent,
                account_vault_strategy)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(org.id.as_str())
        .bind(org.is_expired)
        .bind(&org.bootstrap_token)
        .bind(active_users_limit)
        .bind(org.user_profile_outsider_allowed)
        .bind(org.minimum_archiving_period)
        .bind(match org.allowed_client_agent {
            AllowedClientAgent::NativeOnly => "native_only",
            AllowedClientAgent::NativeOrWeb => "native_or_web",
        })
        .bind(match org.account_vault_strategy {
            AccountVaultStrategy::Allowed => "allowed",
            AccountVaultStrategy::Forbidden => "forbidden",
        })
        .execute(&self.pool)
        .await;

        result.map(|_| ()).map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("organizations_pkey") {
                    return DbError::Duplicate(format!("organization {}", org.id));
                }
            }
            DbError::Query(e)
        })
    }

    async fn bootstrap_organization(
        &self,
        org: &OrganizationId,
        root_verify_key: VerifyKey,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE organizations SET root_verify_key = $2 WHERE id = $1")
            .bind(org.as_str())
            .bind(root_verify_key.to_bytes().to_vec())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("organization {org}")));
        }
        Ok(())
    }

    async fn get_user(&self, org: &OrganizationId, user_id: &UserId) -> DbResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, email, label, initial_profile, profile_updates, created_on,
                   revoked_on, frozen
            FROM users WHERE organization_id = $1 AND user_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(user_id.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_user).transpose()
    }

    async fn find_user_by_email(&self, org: &OrganizationId, email: &str) -> DbResult<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, email, label, initial_profile, profile_updates, created_on,
                   revoked_on, frozen
            FROM users WHERE organization_id = $1 AND email = $2
            "#,
        )
        .bind(org.as_str())
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_user).transpose()
    }

    async fn insert_user(&self, org: &OrganizationId, user: User) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (organization_id, user_id, email, label, initial_profile,
                profile_updates, created_on, revoked_on, frozen)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(org.as_str())
        .bind(user.user_id.to_hex())
        .bind(&user.human_handle.email)
        .bind(&user.human_handle.label)
        .bind(profile_to_str(user.initial_profile))
        .bind(profile_updates_to_json(&user.profile_updates))
        .bind(user.created_on.as_wire_seconds())
        .bind(user.revoked_on.map(|t| t.as_wire_seconds()))
        .bind(user.frozen)
        .execute(&self.pool)
        .await;

        result.map(|_| ()).map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().map(|c| c.contains("email")).unwrap_or(false) {
                    return DbError::Duplicate(format!("user email {}", user.human_handle.email));
                }
                if db_err.constraint().map(|c| c.contains("pkey")).unwrap_or(false) {
                    return DbError::Duplicate(format!("user {}", user.user_id));
                }
            }
            DbError::Query(e)
        })
    }

    async fn update_user_profile(
        &self,
        org: &OrganizationId,
        user_id: &UserId,
        update: ProfileUpdate,
    ) -> DbResult<()> {
        let user = self
            .get_user(org, user_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {user_id}")))?;
        let mut updates = user.profile_updates;
        updates.push(update);
        sqlx::query("UPDATE users SET profile_updates = $3 WHERE organization_id = $1 AND user_id = $2")
            .bind(org.as_str())
            .bind(user_id.to_hex())
            .bind(profile_updates_to_json(&updates))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke_user(
        &self,
        org: &OrganizationId,
        user_id: &UserId,
        revoked_on: Timestamp,
    ) -> DbResult<()> {
        sqlx::query("UPDATE users SET revoked_on = $3 WHERE organization_id = $1 AND user_id = $2")
            .bind(org.as_str())
            .bind(user_id.to_hex())
            .bind(revoked_on.as_wire_seconds())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_frozen(&self, org: &OrganizationId, user_id: &UserId, frozen: bool) -> DbResult<()> {
        sqlx::query("UPDATE users SET frozen = $3 WHERE organization_id = $1 AND user_id = $2")
            .bind(org.as_str())
            .bind(user_id.to_hex())
            .bind(frozen)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_device(&self, org: &OrganizationId, device_id: &DeviceId) -> DbResult<Option<Device>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, device_name, verify_key, certificate, created_on, device_label
            FROM devices WHERE organization_id = $1 AND user_id = $2 AND device_name = $3
            "#,
        )
        .bind(org.as_str())
        .bind(device_id.user_id.to_hex())
        .bind(&device_id.device_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_device).transpose()
    }

    async fn insert_device(&self, org: &OrganizationId, device: Device) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO devices (organization_id, user_id, device_name, verify_key, certificate,
                created_on, device_label)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(org.as_str())
        .bind(device.device_id.user_id.to_hex())
        .bind(&device.device_id.device_name)
        .bind(device.verify_key.to_bytes().to_vec())
        .bind(&device.certificate)
        .bind(device.created_on.as_wire_seconds())
        .bind(&device.device_label)
        .execute(&self.pool)
        .await;

        result.map(|_| ()).map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().map(|c| c.contains("pkey")).unwrap_or(false) {
                    return DbError::Duplicate(format!("device {}", device.device_id));
                }
            }
            DbError::Query(e)
        })
    }

    async fn get_realm(&self, org: &OrganizationId, realm_id: &RealmId) -> DbResult<Option<Realm>> {
        let row = sqlx::query(
            r#"
            SELECT realm_id, created_on, roles, key_rotations, checkpoint,
                   last_realm_certificate_timestamp, archived_on, archiving_configured_by
            FROM realms WHERE organization_id = $1 AND realm_id = $2
            "#,
        )
        .bind(org.as_str())
        .bind(realm_id.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_realm).transpose()
    }

    async fn list_realms(&self, org: &OrganizationId) -> DbResult<Vec<Realm>> {
        let rows = sqlx::query(
            r#"
            SELECT realm_id, created_on, roles, key_rotations, checkpoint,
                   last_realm_certificate_timestamp, archived_on, archiving_configured_by
            FROM realms WHERE organization_id = $1
            "#,
        )
        .bind(org.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_realm).collect()
    }

    async fn insert_realm(&self, org: &OrganizationId, realm: Realm) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO realms (organization_id, realm_id, created_on, roles, key_rotations,
                checkpoint, last_realm_certificate_timestamp, archived_on, archiving_configured_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(org.as_str())
        .bind(realm.realm_id.to_hex())
        .bind(realm.created_on.as_wire_seconds())
        .bind(roles_to_json(&realm.roles))
        .bind(key_rotations_to_json(&realm.key_rotations))
        .bind(realm.checkpoint as i64)
        .bind(realm.last_realm_certificate_timestamp.as_wire_seconds())
        .bind(realm.archived_on.map(|t| t.as_wire_seconds()))
        .bind(realm.archiving_configured_by.map(|u| u.to_hex()))
        .execute(&self.pool)
        .await;

        result.map(|_| ()).map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().map(|c| c.contains("pkey")).unwrap_or(false) {
                    return DbError::Duplicate(format!("realm {}", realm.realm_id));
                }
            }
            DbError::Query(e)
        })
    }

    async fn append_realm_role(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        entry: RealmUserRoleEntry,
    ) -> DbResult<()> {
        let mut realm = self
            .get_realm(org, realm_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("realm {realm_id}")))?;
        realm.last_realm_certificate_timestamp = entry.timestamp;
        realm.roles.push(entry);
        sqlx::query(
            "UPDATE realms SET roles = $3, last_realm_certificate_timestamp = $4 \
             WHERE organization_id = $1 AND realm_id = $2",
        )
        .bind(org.as_str())
        .bind(realm_id.to_hex())
        .bind(roles_to_json(&realm.roles))
        .bind(realm.last_realm_certificate_timestamp.as_wire_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_key_rotation(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        entry: KeyRotationEntry,
    ) -> DbResult<()> {
        let mut realm = self
            .get_realm(org, realm_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("realm {realm_id}")))?;
        realm.last_realm_certificate_timestamp = entry.timestamp;
        realm.key_rotations.push(entry);
        sqlx::query(
            "UPDATE realms SET key_rotations = $3, last_realm_certificate_timestamp = $4 \
             WHERE organization_id = $1 AND realm_id = $2",
        )
        .bind(org.as_str())
        .bind(realm_id.to_hex())
        .bind(key_rotations_to_json(&realm.key_rotations))
        .bind(realm.last_realm_certificate_timestamp.as_wire_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bump_realm_certificate_timestamp(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        ts: Timestamp,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE realms SET last_realm_certificate_timestamp = GREATEST(last_realm_certificate_timestamp, $3) \
             WHERE organization_id = $1 AND realm_id = $2",
        )
        .bind(org.as_str())
        .bind(realm_id.to_hex())
        .bind(ts.as_wire_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_vlob(&self, org: &OrganizationId, vlob_id: &VlobId) -> DbResult<Option<Vlob>> {
        let row = sqlx::query(
            "SELECT vlob_id, realm_id, versions FROM vlobs WHERE organization_id = $1 AND vlob_id = $2",
        )
        .bind(org.as_str())
        .bind(vlob_id.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_vlob).transpose()
    }

    async fn insert_vlob(&self, org: &OrganizationId, vlob: Vlob) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LockTopic::Realm(vlob.realm_id).advisory_key(org))
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            "INSERT INTO vlobs (organization_id, vlob_id, realm_id, versions) VALUES ($1, $2, $3, $4)",
        )
        .bind(org.as_str())
        .bind(vlob.vlob_id.to_hex())
        .bind(vlob.realm_id.to_hex())
        .bind(versions_to_json(&vlob.versions))
        .execute(&mut *tx)
        .await;

        result.map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().map(|c| c.contains("pkey")).unwrap_or(false) {
                    return DbError::Duplicate(format!("vlob {}", vlob.vlob_id));
                }
            }
            DbError::Query(e)
        })?;

        let row = sqlx::query(
            "UPDATE realms SET checkpoint = checkpoint + 1 \
             WHERE organization_id = $1 AND realm_id = $2 RETURNING checkpoint",
        )
        .bind(org.as_str())
        .bind(vlob.realm_id.to_hex())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(DbError::NotFound(format!("realm {}", vlob.realm_id)));
        };
        let checkpoint: i64 = row.try_get("checkpoint")?;
        tx.commit().await?;
        Ok(checkpoint as u64)
    }

    async fn append_vlob_version(
        &self,
        org: &OrganizationId,
        vlob_id: &VlobId,
        version: VlobVersion,
    ) -> DbResult<u64> {
        let mut existing = self
            .get_vlob(org, vlob_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("vlob {vlob_id}")))?;
        let realm_id = existing.realm_id;

        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LockTopic::Realm(realm_id).advisory_key(org))
            .execute(&mut *tx)
            .await?;

        existing.versions.push(version);
        sqlx::query("UPDATE vlobs SET versions = $3 WHERE organization_id = $1 AND vlob_id = $2")
            .bind(org.as_str())
            .bind(vlob_id.to_hex())
            .bind(versions_to_json(&existing.versions))
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            "UPDATE realms SET checkpoint = checkpoint + 1 \
             WHERE organization_id = $1 AND realm_id = $2 RETURNING checkpoint",
        )
        .bind(org.as_str())
        .bind(realm_id.to_hex())
        .fetch_one(&mut *tx)
        .await?;
        let checkpoint: i64 = row.try_get("checkpoint")?;
        tx.commit().await?;
        Ok(checkpoint as u64)
    }

    async fn poll_vlob_changes(
        &self,
        org: &OrganizationId,
        realm_id: &RealmId,
        since_checkpoint: u64,
    ) -> DbResult<(u64, Vec<(VlobId, u32)>)> {
        let row = sqlx::query("SELECT checkpoint FROM realms WHERE organization_id = $1 AND realm_id = $2")
            .bind(org.as_str())
            .bind(realm_id.to_hex())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("realm {realm_id}")))?;
        let current: i64 = row.try_get("checkpoint")?;
        let current = current as u64;
        if since_checkpoint >= current {
            return Ok((current, Vec::new()));
        }

        let rows = sqlx::query("SELECT vlob_id, versions FROM vlobs WHERE organization_id = $1 AND realm_id = $2")
            .bind(org.as_str())
            .bind(realm_id.to_hex())
            .fetch_all(&self.pool)
            .await?;

        let mut changed = BTreeMap::new();
        for row in rows {
            let vlob_id_hex: String = row.try_get("vlob_id")?;
            let vlob_id = VlobId::from_hex(&vlob_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?;
            let versions: Value = row.try_get("versions")?;
            let versions = versions_from_json(versions)?;
            if let Some(latest) = versions.last() {
                changed.insert(vlob_id, latest.version);
            }
        }
        Ok((current, changed.into_iter().collect()))
    }

    async fn insert_block(&self, org: &OrganizationId, block: Block) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO blocks (organization_id, block_id, realm_id, key_index, size_bytes, author)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(org.as_str())
        .bind(block.block_id.to_hex())
        .bind(block.realm_id.to_hex())
        .bind(block.key_index as i64)
        .bind(block.size as i64)
        .bind(block.author.to_string())
        .execute(&self.pool)
        .await;

        result.map(|_| ()).map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint().map(|c| c.contains("pkey")).unwrap_or(false) {
                    return DbError::Duplicate(format!("block {}", block.block_id));
                }
            }
            DbError::Query(e)
        })
    }

    async fn get_block(&self, org: &OrganizationId, block_id: &VlobId) -> DbResult<Option<Block>> {
        let row = sqlx::query(
            "SELECT block_id, realm_id, key_index, size_bytes, author FROM blocks \
             WHERE organization_id = $1 AND block_id = $2",
        )
        .bind(org.as_str())
        .bind(block_id.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_block).transpose()
    }

    async fn get_realm_stats(&self, org: &OrganizationId, realm_id: &RealmId) -> DbResult<(u64, u64)> {
        let blocks_size: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM blocks WHERE organization_id = $1 AND realm_id = $2",
        )
        .bind(org.as_str())
        .bind(realm_id.to_hex())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query("SELECT versions FROM vlobs WHERE organization_id = $1 AND realm_id = $2")
            .bind(org.as_str())
            .bind(realm_id.to_hex())
            .fetch_all(&self.pool)
            .await?;
        let mut vlobs_size = 0u64;
        for row in rows {
            let versions: Value = row.try_get("versions")?;
            for version in versions_from_json(versions)? {
                vlobs_size += version.blob.len() as u64;
            }
        }

        Ok((blocks_size as u64, vlobs_size))
    }

    async fn get_invitation(
        &self,
        org: &OrganizationId,
        token: &InvitationToken,
    ) -> DbResult<Option<Invitation>> {
        let row = sqlx::query(
            r#"
            SELECT token, invitation_type, created_by_device_id, created_on, claimer_email,
                   claimer_user_id, status
            FROM invitations WHERE organization_id = $1 AND token = $2
            "#,
        )
        .bind(org.as_str())
        .bind(token.to_hex())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_invitation).transpose()
    }

    async fn find_pending_user_invitation(
        &self,
        org: &OrganizationId,
        email: &str,
    ) -> DbResult<Option<Invitation>> {
        let row = sqlx::query(
            r#"
            SELECT token, invitation_type, created_by_device_id, created_on, claimer_email,
                   claimer_user_id, status
            FROM invitations
            WHERE organization_id = $1 AND claimer_email = $2 AND status = 'pending'
            "#,
        )
        .bind(org.as_str())
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_invitation).transpose()
    }

    async fn insert_invitation(&self, org: &OrganizationId, invitation: Invitation) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (organization_id, token, invitation_type, created_by_device_id,
                created_on, claimer_email, claimer_user_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(org.as_str())
        .bind(invitation.token.to_hex())
        .bind(invitation_type_to_str(invitation.invitation_type))
        .bind(invitation.created_by_device_id.to_string())
        .bind(invitation.created_on.as_wire_seconds())
        .bind(&invitation.claimer_email)
        .bind(invitation.claimer_user_id.map(|u| u.to_hex()))
        .bind(invitation_status_to_str(invitation.status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_invitation_status(
        &self,
        org: &OrganizationId,
        token: &InvitationToken,
        status: InvitationStatus,
    ) -> DbResult<()> {
        sqlx::query("UPDATE invitations SET status = $3 WHERE organization_id = $1 AND token = $2")
            .bind(org.as_str())
            .bind(token.to_hex())
            .bind(invitation_status_to_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_invitations(&self, org: &OrganizationId) -> DbResult<Vec<Invitation>> {
        let rows = sqlx::query(
            r#"
            SELECT token, invitation_type, created_by_device_id, created_on, claimer_email,
                   claimer_user_id, status
            FROM invitations WHERE organization_id = $1 ORDER BY created_on DESC
            "#,
        )
        .bind(org.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_invitation).collect()
    }

    async fn get_sequester_services(&self, org: &OrganizationId) -> DbResult<Vec<SequesterService>> {
        let rows = sqlx::query(
            r#"
            SELECT service_id, service_type, certificate, created_on, disabled_on, webhook_url
            FROM sequester_services WHERE organization_id = $1
            "#,
        )
        .bind(org.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_sequester_service).collect()
    }

    async fn insert_sequester_service(
        &self,
        org: &OrganizationId,
        service: SequesterService,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sequester_services (organization_id, service_id, service_type, certificate,
                created_on, disabled_on, webhook_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(org.as_str())
        .bind(service.service_id.to_hex())
        .bind(match service.service_type {
            SequesterServiceType::Storage => "storage",
            SequesterServiceType::Webhook => "webhook",
        })
        .bind(&service.certificate)
        .bind(service.created_on.as_wire_seconds())
        .bind(service.disabled_on.map(|t| t.as_wire_seconds()))
        .bind(&service.webhook_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_last_certificate_timestamp(&self, org: &OrganizationId) -> DbResult<Option<Timestamp>> {
        let row = sqlx::query("SELECT last_certificate_timestamp FROM organizations WHERE id = $1")
            .bind(org.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("organization {org}")))?;
        let ts: Option<f64> = row.try_get("last_certificate_timestamp")?;
        Ok(ts.map(Timestamp::from_wire_seconds))
    }

    async fn bump_last_certificate_timestamp(&self, org: &OrganizationId, ts: Timestamp) -> DbResult<()> {
        sqlx::query(
            "UPDATE organizations SET last_certificate_timestamp = \
             GREATEST(COALESCE(last_certificate_timestamp, -1e18), $2) WHERE id = $1",
        )
        .bind(org.as_str())
        .bind(ts.as_wire_seconds())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lock_topic(&self, org: &OrganizationId, topic: LockTopic) -> DbResult<LockGuard> {
        Ok(self.locks.acquire(org, topic).await)
    }
}

fn verify_key_from_vec(bytes: Vec<u8>) -> DbResult<VerifyKey> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("verify key must be 32 bytes".into()))?;
    VerifyKey::from_bytes(&arr).map_err(|e| DbError::Serialization(e.to_string()))
}

fn invitation_type_to_str(t: InvitationType) -> &'static str {
    match t {
        InvitationType::User => "user",
        InvitationType::Device => "device",
        InvitationType::ShamirRecovery => "shamir_recovery",
    }
}

fn invitation_status_to_str(s: InvitationStatus) -> &'static str {
    match s {
        InvitationStatus::Pending => "pending",
        InvitationStatus::Ready => "ready",
        InvitationStatus::Cancelled => "cancelled",
        InvitationStatus::Finished => "finished",
    }
}

fn row_to_user(row: sqlx::postgres::PgRow) -> DbResult<User> {
    let user_id_hex: String = row.try_get("user_id")?;
    let profile_updates: Value = row.try_get("profile_updates")?;
    let created_on: f64 = row.try_get("created_on")?;
    let revoked_on: Option<f64> = row.try_get("revoked_on")?;
    let initial_profile: String = row.try_get("initial_profile")?;
    Ok(User {
        user_id: UserId::from_hex(&user_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        human_handle: crate::model::HumanHandle {
            email: row.try_get("email")?,
            label: row.try_get("label")?,
        },
        initial_profile: profile_from_str(&initial_profile)?,
        profile_updates: profile_updates_from_json(profile_updates)?,
        created_on: Timestamp::from_wire_seconds(created_on),
        revoked_on: revoked_on.map(Timestamp::from_wire_seconds),
        frozen: row.try_get("frozen")?,
    })
}

fn row_to_device(row: sqlx::postgres::PgRow) -> DbResult<Device> {
    let user_id_hex: String = row.try_get("user_id")?;
    let verify_key: Vec<u8> = row.try_get("verify_key")?;
    let created_on: f64 = row.try_get("created_on")?;
    Ok(Device {
        device_id: DeviceId::new(
            UserId::from_hex(&user_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
            row.try_get::<String, _>("device_name")?,
        ),
        verify_key: verify_key_from_vec(verify_key)?,
        certificate: row.try_get("certificate")?,
        created_on: Timestamp::from_wire_seconds(created_on),
        device_label: row.try_get("device_label")?,
    })
}

fn row_to_realm(row: sqlx::postgres::PgRow) -> DbResult<Realm> {
    let realm_id_hex: String = row.try_get("realm_id")?;
    let created_on: f64 = row.try_get("created_on")?;
    let roles: Value = row.try_get("roles")?;
    let key_rotations: Value = row.try_get("key_rotations")?;
    let checkpoint: i64 = row.try_get("checkpoint")?;
    let last_ts: f64 = row.try_get("last_realm_certificate_timestamp")?;
    let archived_on: Option<f64> = row.try_get("archived_on")?;
    let archiving_configured_by: Option<String> = row.try_get("archiving_configured_by")?;
    Ok(Realm {
        realm_id: RealmId::from_hex(&realm_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        created_on: Timestamp::from_wire_seconds(created_on),
        roles: roles_from_json(roles)?,
        key_rotations: key_rotations_from_json(key_rotations)?,
        checkpoint: checkpoint as u64,
        last_realm_certificate_timestamp: Timestamp::from_wire_seconds(last_ts),
        archived_on: archived_on.map(Timestamp::from_wire_seconds),
        archiving_configured_by: archiving_configured_by
            .map(|s| UserId::from_hex(&s))
            .transpose()
            .map_err(|e| DbError::Serialization(e.to_string()))?,
    })
}

fn row_to_vlob(row: sqlx::postgres::PgRow) -> DbResult<Vlob> {
    let vlob_id_hex: String = row.try_get("vlob_id")?;
    let realm_id_hex: String = row.try_get("realm_id")?;
    let versions: Value = row.try_get("versions")?;
    Ok(Vlob {
        vlob_id: VlobId::from_hex(&vlob_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        realm_id: RealmId::from_hex(&realm_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        versions: versions_from_json(versions)?,
    })
}

fn row_to_block(row: sqlx::postgres::PgRow) -> DbResult<Block> {
    let block_id_hex: String = row.try_get("block_id")?;
    let realm_id_hex: String = row.try_get("realm_id")?;
    let key_index: i64 = row.try_get("key_index")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;
    let author: String = row.try_get("author")?;
    let (user_hex, device_name) = author.split_once('@').unwrap_or((author.as_str(), ""));
    Ok(Block {
        block_id: VlobId::from_hex(&block_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        realm_id: RealmId::from_hex(&realm_id_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        key_index: key_index as u32,
        size: size_bytes as u64,
        author: DeviceId::new(
            UserId::from_hex(user_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
            device_name,
        ),
    })
}

fn row_to_invitation(row: sqlx::postgres::PgRow) -> DbResult<Invitation> {
    let token_hex: String = row.try_get("token")?;
    let invitation_type: String = row.try_get("invitation_type")?;
    let created_by: String = row.try_get("created_by_device_id")?;
    let created_on: f64 = row.try_get("created_on")?;
    let claimer_user_id: Option<String> = row.try_get("claimer_user_id")?;
    let status: String = row.try_get("status")?;
    let (user_hex, device_name) = created_by.split_once('@').unwrap_or((created_by.as_str(), ""));
    Ok(Invitation {
        token: InvitationToken::from_hex(&token_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
        invitation_type: match invitation_type.as_str() {
            "device" => InvitationType::Device,
            "shamir_recovery" => InvitationType::ShamirRecovery,
            _ => InvitationType::User,
        },
        created_by_device_id: DeviceId::new(
            UserId::from_hex(user_hex).map_err(|e| DbError::Serialization(e.to_string()))?,
            device_name,
        ),
        created_on: Timestamp::from_wire_seconds(created_on),
        claimer_email: row.try_get("claimer_email")?,
        claimer_user_id: claimer_user_id
            .map(|s| UserId::from_hex(&s))
            .transpose()
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        status: match status.as_str() {
            "ready" => InvitationStatus::Ready,
            "cancelled" => InvitationStatus::Cancelled,
            "finished" => InvitationStatus::Finished,
            _ => InvitationStatus::Pending,
        },
    })
}

fn row_to_sequester_service(row: sqlx::postgres::PgRow) -> DbResult<SequesterService> {
    let service_id_hex: String = row.try_get("service_id")?;
    let service_type: String = row.try_get("service_type")?;
    let created_on: f64 = row.try_get("created_on")?;
    let disabled_on: Option<f64> = row.try_get("disabled_on")?;
    Ok(SequesterService {
        service_id: SequesterServiceId::from_hex(&service_id_hex)
            .map_err(|e| DbError::Serialization(e.to_string()))?,
        service_type: if service_type == "webhook" {
            SequesterServiceType::Webhook
        } else {
            SequesterServiceType::Storage
        },
        certificate: row.try_get("certificate")?,
        created_on: Timestamp::from_wire_seconds(created_on),
        disabled_on: disabled_on.map(Timestamp::from_wire_seconds),
        webhook_url: row.try_get("webhook_url")?,
    })
}
