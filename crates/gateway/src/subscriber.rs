use std::sync::Arc;

use {
    tokio::task::JoinHandle,
    tracing::{debug, warn},
};

use parley_bus::subjects::key;

use crate::{registry::ClientHandle, state::GatewayState};

/// Start the per-connection ephemeral-bus subscriber: everything published
/// on the user's channel is forwarded into this connection's send queue.
///
/// Forwarding never blocks; a slow consumer loses envelopes but keeps its
/// session (persistent events remain fetchable via the history API).
/// Abort the returned handle on disconnect; dropping the subscription
/// tears down the underlying channel subscription.
pub async fn start(state: &Arc<GatewayState>, client: &Arc<ClientHandle>) -> Option<JoinHandle<()>> {
    let channel = key::user_channel(&client.user_id);
    let mut subscription = match state.ephemeral.subscribe(&channel).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!(user_id = %client.user_id, error = %e, "user channel subscription failed");
            return None;
        },
    };

    let client = Arc::clone(client);
    let handle = tokio::spawn(async move {
        while let Some(payload) = subscription.next().await {
            match std::str::from_utf8(&payload) {
                Ok(json) => {
                    client.send_json(json.to_string());
                },
                Err(_) => {
                    warn!(user_id = %client.user_id, "dropping non-utf8 envelope from user channel");
                },
            }
        }
        debug!(conn_id = %client.conn_id, "user channel subscriber ended");
    });

    debug!(channel = %channel, "user channel subscriber started");
    Some(handle)
}
