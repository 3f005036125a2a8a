//! Host configuration.
//!
//! [`HostConfig`] deserialises from any `serde` format; every field has a
//! default so partial documents are accepted.

use serde::Deserialize;

use crate::{broadcast::EchoPolicy, idle::IdleConfig, pipeline::DEFAULT_MAILBOX_CAPACITY};

const fn default_mailbox_capacity() -> usize { DEFAULT_MAILBOX_CAPACITY }

/// Settings applied to every connection a [`Host`](crate::Host) accepts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Capacity of each connection's mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Idle windows; all zero disables idle detection.
    pub idle: IdleConfig,
    /// Deliver broadcasts back to their sender.
    pub echo: EchoSetting,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            idle: IdleConfig::default(),
            echo: EchoSetting::default(),
        }
    }
}

/// Serialisable form of [`EchoPolicy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoSetting {
    /// Echo to the sender.
    #[default]
    Include,
    /// Do not echo to the sender.
    Exclude,
}

impl From<EchoSetting> for EchoPolicy {
    fn from(setting: EchoSetting) -> Self {
        match setting {
            EchoSetting::Include => EchoPolicy::IncludeSender,
            EchoSetting::Exclude => EchoPolicy::ExcludeSender,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::de::{
        IntoDeserializer,
        value::{Error, MapDeserializer, StrDeserializer},
    };

    use super::*;

    #[test]
    fn partial_documents_use_defaults() {
        let map = MapDeserializer::<_, Error>::new([("mailbox_capacity", 16_usize)].into_iter());
        let config = HostConfig::deserialize(map).expect("valid document");
        assert_eq!(config.mailbox_capacity, 16);
        assert!(config.idle.is_disabled());
        assert_eq!(EchoPolicy::from(config.echo), EchoPolicy::IncludeSender);
    }

    #[test]
    fn echo_setting_parses_snake_case() {
        let de: StrDeserializer<'_, Error> = "exclude".into_deserializer();
        let setting = EchoSetting::deserialize(de).expect("known variant");
        assert_eq!(EchoPolicy::from(setting), EchoPolicy::ExcludeSender);
    }
}
