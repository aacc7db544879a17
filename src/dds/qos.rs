//! set of QoS policies for RTPS Writers and Readers and their builders

// DDS 1.4 spec: 2.3.3 DCPS PSM : IDL
// rtps 2.3 spec: 8.7.2.2 DDS QoS Parameters that affect the wire protocol

use policy::*;

macro_rules! getter_method {
    ($name:ident, $policy_type:ident) => {
        pub fn $name(&self) -> $policy_type {
            self.$name
        }
    };
}

macro_rules! builder_method {
    ($name:ident, $policy_name:ident) => {
        pub fn $name(mut self, $name: $policy_name) -> Self {
            self.$name = Some($name);
            self
        }
    };
}

/// A collection of QoS policies for configuring the behavior of a Writer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriterQos {
    durability: Durability,
    liveliness: Liveliness,
    reliability: Reliability,
    history: History,
    resource_limits: ResourceLimits,
}

impl WriterQos {
    getter_method!(durability, Durability);
    getter_method!(liveliness, Liveliness);
    getter_method!(reliability, Reliability);
    getter_method!(history, History);
    getter_method!(resource_limits, ResourceLimits);

    pub fn is_reliable(&self) -> bool {
        self.reliability.kind == ReliabilityQosKind::Reliable
    }
}

impl Default for WriterQos {
    fn default() -> Self {
        WriterQosBuilder::new().build()
    }
}

/// A collection of QoS policies for configuring the behavior of a Reader
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReaderQos {
    durability: Durability,
    liveliness: Liveliness,
    reliability: Reliability,
    history: History,
    resource_limits: ResourceLimits,
}

impl ReaderQos {
    getter_method!(durability, Durability);
    getter_method!(liveliness, Liveliness);
    getter_method!(reliability, Reliability);
    getter_method!(history, History);
    getter_method!(resource_limits, ResourceLimits);

    pub fn is_reliable(&self) -> bool {
        self.reliability.kind == ReliabilityQosKind::Reliable
    }

    /// check whether a remote Writer offering `qos` can be matched with this Reader
    pub fn is_compatible(&self, qos: &WriterQos) -> Result<(), String> {
        let mut msg = String::from("{ ");
        let mut is_ok = true;
        if !Durability::is_compatible(qos.durability, self.durability) {
            is_ok = false;
            msg += &format!(
                "{{ durability is not compatible. reader(self): {:?}, writer(remote): {:?} }}, ",
                self.durability, qos.durability
            );
        }
        if !Liveliness::is_compatible(qos.liveliness, self.liveliness) {
            is_ok = false;
            msg += &format!(
                "{{ liveliness is not compatible. reader(self): {:?}, writer(remote): {:?} }}, ",
                self.liveliness, qos.liveliness
            );
        }
        if !Reliability::is_compatible(qos.reliability, self.reliability) {
            is_ok = false;
            msg += &format!(
                "{{ reliability is not compatible. reader(self): {:?}, writer(remote): {:?} }}, ",
                self.reliability, qos.reliability
            );
        }
        if is_ok {
            Ok(())
        } else {
            msg.pop();
            msg.pop();
            msg += " }";
            Err(msg)
        }
    }
}

impl Default for ReaderQos {
    fn default() -> Self {
        ReaderQosBuilder::new().build()
    }
}

/// Builder of WriterQos
#[derive(Default)]
pub struct WriterQosBuilder {
    durability: Option<Durability>,
    liveliness: Option<Liveliness>,
    reliability: Option<Reliability>,
    history: Option<History>,
    resource_limits: Option<ResourceLimits>,
}

impl WriterQosBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    builder_method!(durability, Durability);
    builder_method!(liveliness, Liveliness);
    builder_method!(reliability, Reliability);
    builder_method!(history, History);
    builder_method!(resource_limits, ResourceLimits);

    pub fn build(self) -> WriterQos {
        WriterQos {
            durability: self.durability.unwrap_or_default(),
            liveliness: self.liveliness.unwrap_or_default(),
            // DDS v1.4 spec, 2.2.3 Supported QoS: DataWriter defaults to Reliable
            reliability: self
                .reliability
                .unwrap_or_else(Reliability::default_reliable),
            history: self.history.unwrap_or_default(),
            resource_limits: self.resource_limits.unwrap_or_default(),
        }
    }
}

/// Builder of ReaderQos
#[derive(Default)]
pub struct ReaderQosBuilder {
    durability: Option<Durability>,
    liveliness: Option<Liveliness>,
    reliability: Option<Reliability>,
    history: Option<History>,
    resource_limits: Option<ResourceLimits>,
}

impl ReaderQosBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    builder_method!(durability, Durability);
    builder_method!(liveliness, Liveliness);
    builder_method!(reliability, Reliability);
    builder_method!(history, History);
    builder_method!(resource_limits, ResourceLimits);

    pub fn build(self) -> ReaderQos {
        ReaderQos {
            durability: self.durability.unwrap_or_default(),
            liveliness: self.liveliness.unwrap_or_default(),
            reliability: self
                .reliability
                .unwrap_or_else(Reliability::default_besteffort),
            history: self.history.unwrap_or_default(),
            resource_limits: self.resource_limits.unwrap_or_default(),
        }
    }
}

pub mod policy {
    //! QoS policies which affect the RTPS wire protocol
    //!
    //! DDS v1.4 spec, 2.2.3 Supported QoS (<https://www.omg.org/spec/DDS/1.4/PDF#G5.1034386>)
    use crate::structure::Duration;
    use serde::{Deserialize, Serialize};
    use serde_repr::{Deserialize_repr, Serialize_repr};

    // Default value of QoS Policies is on DDS v1.4 spec 2.2.3 Supported QoS
    pub const LENGTH_UNLIMITED: i32 = -1;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize_repr, Deserialize_repr)]
    #[repr(i32)]
    /// Durability QoS policy
    ///
    /// A TransientLocal Writer sends the changes it holds to late-joining
    /// TransientLocal Readers. Transient and Persistent are not supported.
    pub enum Durability {
        Volatile = 0,
        TransientLocal = 1,
    }
    impl Durability {
        /// offered is Writer side QoS value
        /// requested is Reader side QoS value
        pub(crate) fn is_compatible(offered: Self, requested: Self) -> bool {
            offered as usize >= requested as usize
        }
    }
    impl Default for Durability {
        fn default() -> Self {
            Self::Volatile
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Liveliness {
        pub kind: LivelinessQosKind,
        pub lease_duration: Duration,
    }
    impl Liveliness {
        pub(crate) fn is_compatible(offered: Self, requested: Self) -> bool {
            offered.kind as usize >= requested.kind as usize
                && offered.lease_duration <= requested.lease_duration
        }
    }
    impl Default for Liveliness {
        fn default() -> Self {
            Self {
                kind: LivelinessQosKind::Automatic,
                lease_duration: Duration::INFINITE,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Serialize_repr, Deserialize_repr)]
    #[repr(i32)]
    pub enum LivelinessQosKind {
        Automatic = 0,
        ManualByParticipant = 1,
        ManualByTopic = 2,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    pub struct Reliability {
        pub kind: ReliabilityQosKind,
        pub max_bloking_time: Duration,
    }
    impl Reliability {
        // DDS v1.4 spec, 2.2.3 Supported QoS specifies
        // default value of max_bloking_time is 100ms
        pub fn default_besteffort() -> Self {
            Self {
                kind: ReliabilityQosKind::BestEffort,
                max_bloking_time: Duration::from_millis(100),
            }
        }
        pub fn default_reliable() -> Self {
            Self {
                kind: ReliabilityQosKind::Reliable,
                max_bloking_time: Duration::from_millis(100),
            }
        }

        pub(crate) fn is_compatible(offered: Self, requested: Self) -> bool {
            offered.kind as usize >= requested.kind as usize
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
    #[repr(i32)]
    pub enum ReliabilityQosKind {
        Reliable = 2,
        BestEffort = 1,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    pub struct History {
        pub kind: HistoryQosKind,
        pub depth: i32,
    }
    impl Default for History {
        fn default() -> Self {
            Self {
                kind: HistoryQosKind::KeepLast,
                depth: 1,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
    #[repr(i32)]
    pub enum HistoryQosKind {
        KeepLast = 0,
        KeepAll = 1,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
    pub struct ResourceLimits {
        pub max_samples: i32,
        pub max_instance: i32,
        pub max_samples_per_instanse: i32,
    }
    impl Default for ResourceLimits {
        fn default() -> Self {
            Self {
                max_samples: LENGTH_UNLIMITED,
                max_instance: LENGTH_UNLIMITED,
                max_samples_per_instanse: LENGTH_UNLIMITED,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::structure::Duration;

    #[test]
    fn besteffort_writer_does_not_match_reliable_reader() {
        let writer = WriterQosBuilder::new()
            .reliability(Reliability::default_besteffort())
            .build();
        let reader = ReaderQosBuilder::new()
            .reliability(Reliability::default_reliable())
            .build();
        assert!(reader.is_compatible(&writer).is_err());
        assert!(ReaderQos::default().is_compatible(&writer).is_ok());
    }

    #[test]
    fn volatile_writer_does_not_match_transient_local_reader() {
        let reader = ReaderQosBuilder::new()
            .durability(Durability::TransientLocal)
            .build();
        let err = reader.is_compatible(&WriterQos::default()).unwrap_err();
        assert!(err.contains("durability"));
        let writer = WriterQosBuilder::new()
            .durability(Durability::TransientLocal)
            .liveliness(Liveliness {
                kind: LivelinessQosKind::Automatic,
                lease_duration: Duration::from_secs(1),
            })
            .build();
        assert!(reader.is_compatible(&writer).is_ok());
    }
}
