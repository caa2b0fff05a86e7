//! Replication intake
//!
//! Listens on the node's channel port for JSON-line request/reply traffic
//! from peers and dispatches every message through the same vector-clock-
//! aware apply logic as client writes.

use crate::cluster::message::{DataType, NodeMessage, Reply};
use crate::node::apply::{self, PatchKind};
use crate::node::context::NodeContext;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accept-loop for peer connections. Runs until the listener task is
/// aborted at shutdown.
pub async fn serve(ctx: Arc<NodeContext>, listener: TcpListener) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("replication accept failed: {}", e);
                continue;
            }
        };
        tracing::debug!(peer = %peer_addr, "replication connection opened");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ctx, stream).await {
                tracing::debug!(peer = %peer_addr, "replication connection closed: {}", e);
            }
        });
    }
}

async fn handle_connection(ctx: Arc<NodeContext>, stream: TcpStream) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let reply = match serde_json::from_str::<NodeMessage>(line.trim()) {
            Ok(msg) => dispatch(&ctx, msg).await,
            Err(e) => Reply::error(format!("malformed message: {}", e)),
        };
        let out = serde_json::to_string(&reply).unwrap_or_else(|_| r#"{"status":"error"}"#.into());
        write.write_all(out.as_bytes()).await?;
        write.write_all(b"\n").await?;
        write.flush().await?;
    }
}

/// Route one replication message through the apply logic.
pub async fn dispatch(ctx: &NodeContext, msg: NodeMessage) -> Reply {
    let kind = msg.kind();
    let result = match msg {
        NodeMessage::Read { key, data_type } => return read_local(ctx, &key, data_type).await,
        NodeMessage::CreateList { list } => apply::replica_create_list(ctx, &list).await,
        NodeMessage::DeleteList { list_id } => apply::replica_delete_list(ctx, &list_id).await,
        NodeMessage::AddItem { item } => apply::replica_add_item(ctx, &item).await,
        NodeMessage::UpdateItem { item } => apply::replica_update_item(ctx, &item, None).await,
        NodeMessage::UpdateName { item } => {
            apply::replica_update_item(ctx, &item, Some(PatchKind::Name)).await
        }
        NodeMessage::UpdateQuantity { item } => {
            apply::replica_update_item(ctx, &item, Some(PatchKind::Quantity)).await
        }
        NodeMessage::ToggleCheck { item } => {
            apply::replica_update_item(ctx, &item, Some(PatchKind::Toggle)).await
        }
        NodeMessage::RemoveItem { item_id } => apply::replica_remove_item(ctx, &item_id).await,
        NodeMessage::Broadcast { .. } => {
            return Reply::error("BROADCAST is handled by the coordinator")
        }
    };

    match result {
        Ok(applied) => {
            tracing::debug!(kind, ?applied, "applied replication message");
            Reply::ok()
        }
        Err(e) => {
            tracing::warn!(kind, "replication apply failed: {}", e);
            Reply::error(e.to_string())
        }
    }
}

/// Serve a READ from local state only; the asking peer does the quorum
/// accounting.
async fn read_local(ctx: &NodeContext, key: &str, data_type: DataType) -> Reply {
    let doc = match data_type {
        DataType::List => match ctx.store.get_list(key) {
            Ok(list) => list.and_then(|l| serde_json::to_value(l).ok()),
            Err(e) => return Reply::error(e.to_string()),
        },
        DataType::Item => {
            let set = ctx.set.lock().await;
            set.get(key).and_then(|i| serde_json::to_value(i).ok())
        }
    };
    Reply::ok_with(doc.unwrap_or(serde_json::Value::Null))
}
