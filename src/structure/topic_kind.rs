use serde::{Deserialize, Serialize};

/// rtps 2.3 spec, 8.2.1.2 Table 8.2: whether the data-objects carry a key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopicKind {
    NoKey,
    WithKey,
}
