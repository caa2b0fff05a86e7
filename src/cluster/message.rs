//! Inter-node message envelopes
//!
//! Every request between peers (and toward the coordinator) is one JSON
//! object on one line; the reply is the same. Item-bearing messages carry
//! the full internal CRDT document so the receiver can merge state-wise.

use crate::crdt::{Item, List};
use serde::{Deserialize, Serialize};

/// What a READ request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    List,
    Item,
}

/// Request envelope, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeMessage {
    #[serde(rename = "READ")]
    Read {
        key: String,
        #[serde(rename = "dataType")]
        data_type: DataType,
    },
    #[serde(rename = "CREATE_LIST")]
    CreateList { list: List },
    #[serde(rename = "DELETE_LIST")]
    DeleteList {
        #[serde(rename = "listId")]
        list_id: String,
    },
    #[serde(rename = "ADD_ITEM")]
    AddItem { item: Item },
    #[serde(rename = "UPDATE_ITEM")]
    UpdateItem { item: Item },
    #[serde(rename = "UPDATE_NAME")]
    UpdateName { item: Item },
    #[serde(rename = "UPDATE_QUANTITY")]
    UpdateQuantity { item: Item },
    #[serde(rename = "TOGGLE_CHECK")]
    ToggleCheck { item: Item },
    #[serde(rename = "REMOVE_ITEM")]
    RemoveItem {
        #[serde(rename = "itemId")]
        item_id: String,
    },
    #[serde(rename = "BROADCAST")]
    Broadcast {
        event: String,
        data: serde_json::Value,
    },
}

impl NodeMessage {
    /// The routing key of the entity this message targets, when it has one.
    pub fn key(&self) -> Option<&str> {
        match self {
            NodeMessage::Read { key, .. } => Some(key),
            NodeMessage::CreateList { list } => Some(&list.id),
            NodeMessage::DeleteList { list_id } => Some(list_id),
            NodeMessage::AddItem { item }
            | NodeMessage::UpdateItem { item }
            | NodeMessage::UpdateName { item }
            | NodeMessage::UpdateQuantity { item }
            | NodeMessage::ToggleCheck { item } => Some(&item.id),
            NodeMessage::RemoveItem { item_id } => Some(item_id),
            NodeMessage::Broadcast { .. } => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeMessage::Read { .. } => "READ",
            NodeMessage::CreateList { .. } => "CREATE_LIST",
            NodeMessage::DeleteList { .. } => "DELETE_LIST",
            NodeMessage::AddItem { .. } => "ADD_ITEM",
            NodeMessage::UpdateItem { .. } => "UPDATE_ITEM",
            NodeMessage::UpdateName { .. } => "UPDATE_NAME",
            NodeMessage::UpdateQuantity { .. } => "UPDATE_QUANTITY",
            NodeMessage::ToggleCheck { .. } => "TOGGLE_CHECK",
            NodeMessage::RemoveItem { .. } => "REMOVE_ITEM",
            NodeMessage::Broadcast { .. } => "BROADCAST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Reply envelope. `data` rides along on READ replies; `error` explains a
/// rejected request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            data: None,
            error: None,
        }
    }

    pub fn ok_with(data: serde_json::Value) -> Self {
        Self {
            status: ReplyStatus::Ok,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::List;

    #[test]
    fn test_envelope_tag_shape() {
        let msg = NodeMessage::Read {
            key: "L1".into(),
            data_type: DataType::List,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "READ");
        assert_eq!(json["dataType"], "list");

        let msg = NodeMessage::DeleteList {
            list_id: "L1".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "DELETE_LIST");
        assert_eq!(json["listId"], "L1");
    }

    #[test]
    fn test_round_trip() {
        let list = List::new("L1", "Weekly", "node-7001");
        let msg = NodeMessage::CreateList { list };
        let line = serde_json::to_string(&msg).unwrap();
        let back: NodeMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.key(), Some("L1"));
        assert_eq!(back.kind(), "CREATE_LIST");
    }

    #[test]
    fn test_reply_shapes() {
        let ok = Reply::ok();
        assert!(ok.is_ok());
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"status":"ok"}"#);

        let err = Reply::error("nope");
        assert!(!err.is_ok());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "nope");
    }
}
