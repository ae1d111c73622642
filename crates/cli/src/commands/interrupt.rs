//! Interruption-notice injector for exercising spot reclaim handling

use anyhow::Result;

use crate::client::{ApiClient, InterruptionNotice};
use crate::output::print_success;

/// Inject a spot interruption notice for a node
pub async fn inject_interruption(client: &ApiClient, node: &str, deadline_in: i64) -> Result<()> {
    let deadline = chrono::Utc::now().timestamp() + deadline_in;

    client
        .post(
            "/api/v1/interruptions",
            &InterruptionNotice {
                node_id: node.to_string(),
                deadline,
            },
        )
        .await?;

    print_success(&format!(
        "Interruption notice for {} accepted, reclaim deadline in {}s",
        node, deadline_in
    ));

    Ok(())
}
