//! Mapping from library events to webhook catalog events.

use serde_json::{json, Value};

use crate::webhook::EventType;
use crate::whatsapp::{ClientEvent, NotificationKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    /// Deliver as a catalog event with this data
    Event(EventType, Value),
    /// Consumed by the session state machine; no user event
    Internal,
    /// No catalog entry; dropped and counted
    Unknown(String),
}

pub fn translate(event: &ClientEvent) -> Translation {
    match event {
        ClientEvent::Qr { code, timeout } => Translation::Event(
            EventType::QRCode,
            json!({ "qrCode": code, "timeoutSecs": timeout.as_secs() }),
        ),
        ClientEvent::PairSuccess {
            jid,
            platform,
            business_name,
        } => Translation::Event(
            EventType::PairSuccess,
            json!({ "jid": jid, "platform": platform, "businessName": business_name }),
        ),
        ClientEvent::Connected => Translation::Event(EventType::Connected, json!({})),
        ClientEvent::Disconnected => Translation::Event(EventType::Disconnected, json!({})),
        ClientEvent::LoggedOut { on_connect, reason } => Translation::Event(
            EventType::LoggedOut,
            json!({ "onConnect": on_connect, "reason": reason }),
        ),
        ClientEvent::KeepAliveTimeout { error_count } => Translation::Event(
            EventType::KeepAliveTimeout,
            json!({ "errorCount": error_count }),
        ),
        ClientEvent::KeepAliveRestored => {
            Translation::Event(EventType::KeepAliveRestored, json!({}))
        }
        ClientEvent::PairError { .. } | ClientEvent::StreamError { .. } => Translation::Internal,
        ClientEvent::Notification { kind, payload } => translate_notification(*kind, payload),
        ClientEvent::Other { kind, .. } => Translation::Unknown(kind.clone()),
    }
}

fn translate_notification(kind: NotificationKind, payload: &Value) -> Translation {
    let event_type = match kind {
        NotificationKind::Message => message_type(payload),
        NotificationKind::Receipt => EventType::Receipt,
        NotificationKind::ChatPresence => EventType::ChatPresence,
        NotificationKind::GroupInfo => EventType::GroupInfo,
        NotificationKind::JoinedGroup => EventType::JoinedGroup,
        NotificationKind::Picture => EventType::Picture,
        NotificationKind::IdentityChange => EventType::IdentityChange,
        NotificationKind::PrivacySettings => EventType::PrivacySettings,
        NotificationKind::Blocklist => EventType::Blocklist,
        NotificationKind::HistorySync => EventType::HistorySync,
        NotificationKind::OfflineSyncPreview => EventType::OfflineSyncPreview,
        NotificationKind::OfflineSyncCompleted => EventType::OfflineSyncCompleted,
        NotificationKind::AppState => EventType::AppState,
        NotificationKind::CallOffer => EventType::CallOffer,
        NotificationKind::CallAccept => EventType::CallAccept,
        NotificationKind::CallPreAccept => EventType::CallPreAccept,
        NotificationKind::CallTransport => EventType::CallTransport,
        NotificationKind::CallOfferNotice => EventType::CallOfferNotice,
        NotificationKind::CallRelayLatency => EventType::CallRelayLatency,
        NotificationKind::CallTerminate => EventType::CallTerminate,
        NotificationKind::UnknownCallEvent => EventType::UnknownCallEvent,
        NotificationKind::NewsletterJoin => EventType::NewsletterJoin,
        NotificationKind::NewsletterLeave => EventType::NewsletterLeave,
        NotificationKind::NewsletterMuteChange => EventType::NewsletterMuteChange,
        NotificationKind::NewsletterLiveUpdate => EventType::NewsletterLiveUpdate,
        NotificationKind::NewsletterMessageMeta => EventType::NewsletterMessageMeta,
        NotificationKind::MediaRetry => EventType::MediaRetry,
        NotificationKind::UndecryptableMessage
        | NotificationKind::Presence
        | NotificationKind::AppStateSyncComplete => {
            return Translation::Unknown(kind.as_str().to_string())
        }
    };

    let data = if payload.is_object() {
        payload.clone()
    } else {
        json!({ "value": payload })
    };
    Translation::Event(event_type, data)
}

/// Revocations and reactions arrive as messages carrying a protocol field
fn message_type(payload: &Value) -> EventType {
    if payload.get("revokedMessageId").is_some_and(|v| !v.is_null()) {
        EventType::MessageRevoked
    } else if payload.get("reaction").is_some_and(|v| !v.is_null()) {
        EventType::MessageReaction
    } else {
        EventType::Message
    }
}
