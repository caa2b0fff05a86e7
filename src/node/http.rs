//! Public REST API of a storage node
//!
//! The receiving node is the coordinator for the request: it validates,
//! applies locally, replicates through the quorum coordinator, queues hints
//! for unreachable replicas, and pushes an event to the SSE coordinator.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::cluster::message::{DataType, NodeMessage};
use crate::common::{timestamp_now_millis, Error};
use crate::crdt::{ItemView, List, VectorClock};
use crate::node::apply::{self, AddItemInput, CreateListInput, ItemPatch, PatchKind};
use crate::node::context::NodeContext;

/// Creates the HTTP router with all public endpoints.
pub fn create_router(ctx: Arc<NodeContext>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/lists", post(create_list).get(get_lists))
        .route("/api/lists/:id", get(get_list).delete(delete_list))
        .route("/api/lists/:id/items", post(add_item))
        .route("/api/items", get(get_items))
        .route("/api/items/:id", delete(delete_item))
        .route("/api/items/:id/toggle", patch(toggle_item))
        .route("/api/items/:id/quantity", patch(update_quantity))
        .route("/api/items/:id/name", patch(update_name))
        .with_state(ctx)
}

fn error_response(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    (e.to_http_status(), Json(json!({ "error": e.to_string() })))
}

async fn health(State(ctx): State<Arc<NodeContext>>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "nodeId": ctx.node_id,
        "timestamp": timestamp_now_millis(),
    }))
}

// === Lists ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateListBody {
    id: Option<String>,
    name: Option<String>,
    vector_clock: Option<VectorClock>,
    created_at: Option<u64>,
    last_updated: Option<u64>,
}

async fn create_list(
    State(ctx): State<Arc<NodeContext>>,
    Json(body): Json<CreateListBody>,
) -> impl IntoResponse {
    let Some(name) = body.name.filter(|n| !n.trim().is_empty()) else {
        return error_response(Error::BadRequest("name is required".into())).into_response();
    };

    let input = CreateListInput {
        id: body.id,
        name,
        vector_clock: body.vector_clock,
        created_at: body.created_at,
        last_updated: body.last_updated,
    };
    let list = match apply::create_list(&ctx, input).await {
        Ok(list) => list,
        Err(e) => return error_response(e).into_response(),
    };

    if let Err(e) = ctx
        .replicate(&list.id, NodeMessage::CreateList { list: list.clone() })
        .await
    {
        return error_response(e).into_response();
    }

    let view = list.view(Some(Vec::new()));
    ctx.broadcast("list-created", json!(view));
    (StatusCode::CREATED, Json(json!(view))).into_response()
}

async fn get_lists(State(ctx): State<Arc<NodeContext>>) -> impl IntoResponse {
    match ctx.store.all_lists() {
        Ok(lists) => {
            let views: Vec<_> = lists.iter().map(|l| l.view(None)).collect();
            Json(json!(views)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

async fn get_list(
    State(ctx): State<Arc<NodeContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let local = match ctx.store.get_list(&id) {
        Ok(local) => local,
        Err(e) => return error_response(e).into_response(),
    };

    let list = if let Some(quorum) = &ctx.quorum {
        let local_doc = local.as_ref().and_then(|l| serde_json::to_value(l).ok());
        match quorum.read(&id, DataType::List, local_doc).await {
            Ok(Some(doc)) => match serde_json::from_value::<List>(doc) {
                Ok(winner) => {
                    // settle the reconciled copy locally
                    let merged = match local {
                        Some(mut l) => {
                            l.merge(&winner);
                            l
                        }
                        None => winner,
                    };
                    let _ = ctx.store.save_list(&merged);
                    Some(merged)
                }
                Err(e) => return error_response(Error::Serde(e)).into_response(),
            },
            Ok(None) => None,
            Err(e) => return error_response(e).into_response(),
        }
    } else {
        local
    };

    let Some(list) = list else {
        return error_response(Error::NotFound(format!("list {}", id))).into_response();
    };

    let set = ctx.set.lock().await;
    let items: Vec<ItemView> = set.items_for_list(&id).map(|i| i.view()).collect();
    Json(json!(list.view(Some(items)))).into_response()
}

async fn delete_list(
    State(ctx): State<Arc<NodeContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let list = match apply::delete_list(&ctx, &id).await {
        Ok(list) => list,
        Err(e) => return error_response(e).into_response(),
    };

    if let Err(e) = ctx
        .replicate(&id, NodeMessage::DeleteList { list_id: id.clone() })
        .await
    {
        return error_response(e).into_response();
    }

    ctx.broadcast("list-deleted", json!(list.view(None)));
    Json(json!({ "success": true })).into_response()
}

// === Items ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddItemBody {
    id: Option<String>,
    name: Option<String>,
    quantity: Option<i64>,
    acquired: Option<i64>,
    vector_clock: Option<VectorClock>,
    created_at: Option<u64>,
    last_updated: Option<u64>,
}

async fn add_item(
    State(ctx): State<Arc<NodeContext>>,
    Path(list_id): Path<String>,
    Json(body): Json<AddItemBody>,
) -> impl IntoResponse {
    let Some(name) = body.name.filter(|n| !n.trim().is_empty()) else {
        return error_response(Error::BadRequest("name is required".into())).into_response();
    };

    let input = AddItemInput {
        id: body.id,
        name,
        quantity: body.quantity,
        acquired: body.acquired,
        vector_clock: body.vector_clock,
        created_at: body.created_at,
        last_updated: body.last_updated,
    };
    let item = match apply::add_item(&ctx, &list_id, input).await {
        Ok(item) => item,
        Err(e) => return error_response(e).into_response(),
    };

    if let Err(e) = ctx
        .replicate(&item.id, NodeMessage::AddItem { item: item.clone() })
        .await
    {
        return error_response(e).into_response();
    }

    let view = item.view();
    ctx.broadcast("item-added", json!(view));
    (StatusCode::CREATED, Json(json!(view))).into_response()
}

async fn get_items(State(ctx): State<Arc<NodeContext>>) -> impl IntoResponse {
    let set = ctx.set.lock().await;
    let views: Vec<ItemView> = set.items().map(|i| i.view()).collect();
    Json(json!(views))
}

async fn delete_item(
    State(ctx): State<Arc<NodeContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let item = match apply::remove_item(&ctx, &id).await {
        Ok(item) => item,
        Err(e) => return error_response(e).into_response(),
    };

    if let Err(e) = ctx
        .replicate(&id, NodeMessage::RemoveItem { item_id: id.clone() })
        .await
    {
        return error_response(e).into_response();
    }

    ctx.broadcast("item-removed", json!(item.view()));
    Json(json!({ "success": true })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleBody {
    acquired: Option<i64>,
    vector_clock: Option<VectorClock>,
    last_updated: Option<u64>,
}

async fn toggle_item(
    State(ctx): State<Arc<NodeContext>>,
    Path(id): Path<String>,
    body: Option<Json<ToggleBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(b)| b).unwrap_or(ToggleBody {
        acquired: None,
        vector_clock: None,
        last_updated: None,
    });

    // absent target means "flip": fully acquired, or back to none
    let acquired = match body.acquired {
        Some(a) => Some(a),
        None => {
            let set = ctx.set.lock().await;
            set.get(&id).map(|item| {
                if item.acquired.value() < item.quantity.value() {
                    item.quantity.value()
                } else {
                    0
                }
            })
        }
    };

    let patch = ItemPatch {
        acquired,
        vector_clock: body.vector_clock,
        last_updated: body.last_updated,
        ..Default::default()
    };
    item_patch_response(ctx, id, PatchKind::Toggle, patch, "item-toggled").await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuantityBody {
    quantity: Option<i64>,
    acquired: Option<i64>,
    vector_clock: Option<VectorClock>,
    last_updated: Option<u64>,
}

async fn update_quantity(
    State(ctx): State<Arc<NodeContext>>,
    Path(id): Path<String>,
    Json(body): Json<QuantityBody>,
) -> impl IntoResponse {
    let Some(quantity) = body.quantity else {
        return error_response(Error::BadRequest("quantity is required".into())).into_response();
    };
    if quantity < 0 {
        return error_response(Error::BadRequest("quantity must be non-negative".into()))
            .into_response();
    }

    let patch = ItemPatch {
        quantity: Some(quantity),
        acquired: body.acquired,
        vector_clock: body.vector_clock,
        last_updated: body.last_updated,
        ..Default::default()
    };
    item_patch_response(ctx, id, PatchKind::Quantity, patch, "item-quantity-updated").await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameBody {
    name: Option<String>,
    vector_clock: Option<VectorClock>,
    last_updated: Option<u64>,
}

async fn update_name(
    State(ctx): State<Arc<NodeContext>>,
    Path(id): Path<String>,
    Json(body): Json<NameBody>,
) -> impl IntoResponse {
    let Some(name) = body.name.filter(|n| !n.trim().is_empty()) else {
        return error_response(Error::BadRequest("name is required".into())).into_response();
    };

    let patch = ItemPatch {
        name: Some(name),
        vector_clock: body.vector_clock,
        last_updated: body.last_updated,
        ..Default::default()
    };
    item_patch_response(ctx, id, PatchKind::Name, patch, "item-name-updated").await
}

/// Shared tail of every item PATCH: apply, replicate, broadcast, respond.
async fn item_patch_response(
    ctx: Arc<NodeContext>,
    id: String,
    kind: PatchKind,
    patch: ItemPatch,
    event: &str,
) -> axum::response::Response {
    let (item, applied) = match apply::patch_item(&ctx, &id, kind, patch).await {
        Ok(result) => result,
        Err(e) => return error_response(e).into_response(),
    };

    if applied == apply::Applied::Ignored {
        // causally older request: reply with the existing state, no fan-out
        return Json(json!(item.view())).into_response();
    }

    let msg = match kind {
        PatchKind::Toggle => NodeMessage::ToggleCheck { item: item.clone() },
        PatchKind::Quantity => NodeMessage::UpdateQuantity { item: item.clone() },
        PatchKind::Name => NodeMessage::UpdateName { item: item.clone() },
    };
    if let Err(e) = ctx.replicate(&id, msg).await {
        return error_response(e).into_response();
    }

    ctx.broadcast(event, json!(item.view()));
    Json(json!(item.view())).into_response()
}
