use crate::structure::GuidPrefix;
use speedy::{Readable, Writable};

#[derive(Readable, Writable, Clone, Copy, Debug, PartialEq)]
pub struct InfoDestination {
    pub guid_prefix: GuidPrefix,
}
