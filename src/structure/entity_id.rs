use crate::structure::TopicKind;
use alloc::fmt;
use serde::{Deserialize, Serialize};
use speedy::{Readable, Writable};

// spec 9.2.2
#[derive(
    PartialEq, Readable, Writable, Clone, Copy, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct EntityId {
    entity_key: [u8; 3],
    entity_kind: EntityKind,
}

impl EntityId {
    pub const fn new(entity_key: [u8; 3], entity_kind: EntityKind) -> Self {
        Self {
            entity_key,
            entity_kind,
        }
    }

    /// user defined Writer entity id, `key` becomes the 3 octet entity key
    pub fn new_writer(key: u32, topic_kind: TopicKind) -> Self {
        let kind = match topic_kind {
            TopicKind::WithKey => EntityKind::WRITER_WITH_KEY_USER_DEFIND,
            TopicKind::NoKey => EntityKind::WRITER_NO_KEY_USER_DEFIND,
        };
        Self::new(Self::key_bytes(key), kind)
    }

    /// user defined Reader entity id, `key` becomes the 3 octet entity key
    pub fn new_reader(key: u32, topic_kind: TopicKind) -> Self {
        let kind = match topic_kind {
            TopicKind::WithKey => EntityKind::READER_WITH_KEY_USER_DEFIND,
            TopicKind::NoKey => EntityKind::READER_NO_KEY_USER_DEFIND,
        };
        Self::new(Self::key_bytes(key), kind)
    }

    fn key_bytes(key: u32) -> [u8; 3] {
        let b = key.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    pub fn is_reader(&self) -> bool {
        matches!(
            self.entity_kind,
            EntityKind::READER_WITH_KEY_BUILT_IN
                | EntityKind::READER_NO_KEY_BUILT_IN
                | EntityKind::READER_NO_KEY_USER_DEFIND
                | EntityKind::READER_WITH_KEY_USER_DEFIND
        )
    }

    pub fn is_writer(&self) -> bool {
        matches!(
            self.entity_kind,
            EntityKind::WRITER_WITH_KEY_BUILT_IN
                | EntityKind::WRITER_NO_KEY_BUILT_IN
                | EntityKind::WRITER_NO_KEY_USER_DEFIND
                | EntityKind::WRITER_WITH_KEY_USER_DEFIND
        )
    }

    pub fn topic_kind(&self) -> Option<TopicKind> {
        self.entity_kind.topic_kind()
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity_kind
    }

    pub fn entity_key(&self) -> [u8; 3] {
        self.entity_key
    }

    pub const UNKNOW: Self = Self {
        entity_key: [0x00; 3],
        entity_kind: EntityKind::UNKNOW_USER_DEFIND,
    };

    // rtps spec: 9.3.1.3 Predefined EntityIds
    pub const PARTICIPANT: Self = Self {
        entity_key: [0x00, 0x00, 0x01],
        entity_kind: EntityKind::PARTICIPANT_BUILT_IN,
    };
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNKNOW => write!(f, "EntityId {{ UNKNOW }}"),
            Self::PARTICIPANT => write!(f, "EntityId {{ PARTICIPANT }}"),
            _ => write!(
                f,
                "EntityId {{ entity_key: {:?}, entity_kind: {:?} }}",
                self.entity_key, self.entity_kind
            ),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}.{:02x}",
            self.entity_key[0], self.entity_key[1], self.entity_key[2], self.entity_kind.value
        )
    }
}

#[derive(
    PartialEq, Readable, Writable, Clone, Copy, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct EntityKind {
    value: u8,
}

impl EntityKind {
    // spce 9.3.1.2
    pub const UNKNOW_USER_DEFIND: Self = Self { value: 0x00 };
    pub const WRITER_WITH_KEY_USER_DEFIND: Self = Self { value: 0x02 };
    pub const WRITER_NO_KEY_USER_DEFIND: Self = Self { value: 0x03 };
    pub const READER_NO_KEY_USER_DEFIND: Self = Self { value: 0x04 };
    pub const READER_WITH_KEY_USER_DEFIND: Self = Self { value: 0x07 };

    pub const UNKNOW_BUILT_IN: Self = Self { value: 0xc0 };
    pub const PARTICIPANT_BUILT_IN: Self = Self { value: 0xc1 };
    pub const WRITER_WITH_KEY_BUILT_IN: Self = Self { value: 0xc2 };
    pub const WRITER_NO_KEY_BUILT_IN: Self = Self { value: 0xc3 };
    pub const READER_NO_KEY_BUILT_IN: Self = Self { value: 0xc4 };
    pub const READER_WITH_KEY_BUILT_IN: Self = Self { value: 0xc7 };
}

impl EntityKind {
    fn topic_kind(&self) -> Option<TopicKind> {
        match *self {
            Self::WRITER_WITH_KEY_USER_DEFIND
            | Self::WRITER_WITH_KEY_BUILT_IN
            | Self::READER_WITH_KEY_USER_DEFIND
            | Self::READER_WITH_KEY_BUILT_IN => Some(TopicKind::WithKey),
            Self::WRITER_NO_KEY_USER_DEFIND
            | Self::WRITER_NO_KEY_BUILT_IN
            | Self::READER_NO_KEY_USER_DEFIND
            | Self::READER_NO_KEY_BUILT_IN => Some(TopicKind::NoKey),
            _ => None,
        }
    }
}

impl fmt::Debug for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNKNOW_USER_DEFIND => write!(f, "EntityKind: UNKNOW_USER_DEFIND(0x00)"),
            Self::WRITER_WITH_KEY_USER_DEFIND => {
                write!(f, "EntityKind: WRITER_WITH_KEY_USER_DEFIND(0x02)")
            }
            Self::WRITER_NO_KEY_USER_DEFIND => {
                write!(f, "EntityKind: WRITER_NO_KEY_USER_DEFIND(0x03)")
            }
            Self::READER_NO_KEY_USER_DEFIND => {
                write!(f, "EntityKind: READER_NO_KEY_USER_DEFIND(0x04)")
            }
            Self::READER_WITH_KEY_USER_DEFIND => {
                write!(f, "EntityKind: READER_WITH_KEY_USER_DEFIND(0x07)")
            }
            Self::PARTICIPANT_BUILT_IN => write!(f, "EntityKind: PARTICIPANT_BUILT_IN(0xC1)"),
            _ => write!(f, "EntityKind: OTHER(0x{:02X})", self.value),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn user_defined_ids() {
        let w = EntityId::new_writer(0x0102, TopicKind::WithKey);
        assert!(w.is_writer());
        assert!(!w.is_reader());
        assert_eq!(w.entity_key(), [0x00, 0x01, 0x02]);
        assert_eq!(w.topic_kind(), Some(TopicKind::WithKey));

        let r = EntityId::new_reader(7, TopicKind::NoKey);
        assert!(r.is_reader());
        assert_eq!(r.topic_kind(), Some(TopicKind::NoKey));
        assert_eq!(format!("{}", r), "000007.04");
    }
}
