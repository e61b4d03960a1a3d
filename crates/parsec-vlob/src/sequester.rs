//! Sequester webhook pipeline (spec.md §4.8).

use std::collections::BTreeMap;

use parsec_db::model::SequesterService;
use parsec_types::{OrganizationId, SequesterServiceType};
use serde::Deserialize;

use crate::error::{VlobError, VlobResult};

#[derive(Debug, Deserialize)]
struct RejectionBody {
    reason: String,
}

/// Validate that `sequester_blob`'s keys match exactly the set of
/// non-disabled sequester services, then deliver each `Webhook` service's
/// ciphertext over HTTP. Aborts (and leaves no state changed) on the first
/// rejection or unavailable service, per P9.
pub async fn run_sequester_pipeline(
    client: &reqwest::Client,
    org: &OrganizationId,
    active_services: &[SequesterService],
    sequester_blob: &BTreeMap<parsec_types::SequesterServiceId, Vec<u8>>,
) -> VlobResult<()> {
    let active: std::collections::BTreeSet<_> = active_services.iter().map(|s| s.service_id).collect();
    let provided: std::collections::BTreeSet<_> = sequester_blob.keys().copied().collect();
    if active != provided {
        return Err(VlobError::SequesterInconsistency);
    }

    for service in active_services {
        if service.service_type != SequesterServiceType::Webhook {
            continue;
        }
        let Some(webhook_url) = service.webhook_url.as_deref() else {
            continue;
        };
        let ciphertext = sequester_blob.get(&service.service_id).expect("key set matched above");
        deliver_to_webhook(client, org, service.service_id, webhook_url, ciphertext).await?;
    }

    Ok(())
}

async fn deliver_to_webhook(
    client: &reqwest::Client,
    org: &OrganizationId,
    service_id: parsec_types::SequesterServiceId,
    webhook_url: &str,
    ciphertext: &[u8],
) -> VlobResult<()> {
    let response = client
        .post(webhook_url)
        .query(&[("organization_id", org.as_str()), ("service_id", &service_id.to_hex())])
        .body(ciphertext.to_vec())
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(%service_id, error = %e, "sequester webhook unreachable");
            VlobError::SequesterServiceUnavailable { service_id }
        })?;

    if response.status().is_success() {
        return Ok(());
    }

    if response.status().as_u16() == 400 {
        let reason = response
            .json::<RejectionBody>()
            .await
            .map(|b| b.reason)
            .unwrap_or_else(|_| "sequester service rejected the write".to_string());
        return Err(VlobError::RejectedBySequesterService { service_id, reason });
    }

    tracing::warn!(%service_id, status = %response.status(), "sequester webhook returned an unexpected status");
    Err(VlobError::SequesterServiceUnavailable { service_id })
}
