//! Closed catalog of event types a webhook can subscribe to.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pseudo-token matching every event type
pub const ALL_EVENTS: &str = "All";

macro_rules! event_catalog {
    ($($variant:ident => $category:ident),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventType {
            $($variant),+
        }

        impl EventType {
            /// Every event type, in catalog order
            pub const ALL: &'static [EventType] = &[$(EventType::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventType::$variant => stringify!($variant)),+
                }
            }

            pub fn category(&self) -> EventCategory {
                match self {
                    $(EventType::$variant => EventCategory::$category),+
                }
            }
        }

        impl FromStr for EventType {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(EventType::$variant),)+
                    _ => Err(format!("Unknown event type: {}", s)),
                }
            }
        }
    };
}

event_catalog! {
    Message => Messages,
    MessageRevoked => Messages,
    MessageReaction => Messages,
    Receipt => Messages,
    Connected => Connection,
    Disconnected => Connection,
    QRCode => Connection,
    PairSuccess => Connection,
    LoggedOut => Connection,
    KeepAliveTimeout => Connection,
    KeepAliveRestored => Connection,
    GroupInfo => Groups,
    JoinedGroup => Groups,
    Picture => User,
    IdentityChange => User,
    PrivacySettings => User,
    Blocklist => User,
    ChatPresence => User,
    HistorySync => Sync,
    OfflineSyncPreview => Sync,
    OfflineSyncCompleted => Sync,
    AppState => Sync,
    CallOffer => Calls,
    CallAccept => Calls,
    CallPreAccept => Calls,
    CallTransport => Calls,
    CallOfferNotice => Calls,
    CallRelayLatency => Calls,
    CallTerminate => Calls,
    UnknownCallEvent => Calls,
    NewsletterJoin => Newsletter,
    NewsletterLeave => Newsletter,
    NewsletterMuteChange => Newsletter,
    NewsletterLiveUpdate => Newsletter,
    NewsletterMessageMeta => Newsletter,
    MediaRetry => Media,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventCategory {
    Messages,
    Connection,
    Groups,
    User,
    Sync,
    Calls,
    Newsletter,
    Media,
}

/// True when `token` names a catalog entry or is the `All` pseudo-token
pub fn is_known_token(token: &str) -> bool {
    token == ALL_EVENTS || EventType::from_str(token).is_ok()
}

/// Catalog listing returned by `GET /webhooks/events`
#[derive(Debug, Clone, Serialize)]
pub struct EventCatalog {
    pub events: Vec<EventType>,
    pub categories: BTreeMap<EventCategory, Vec<EventType>>,
}

pub fn catalog() -> EventCatalog {
    let mut categories: BTreeMap<EventCategory, Vec<EventType>> = BTreeMap::new();
    for event in EventType::ALL {
        categories.entry(event.category()).or_default().push(*event);
    }

    EventCatalog {
        events: EventType::ALL.to_vec(),
        categories,
    }
}
