pub mod audit;
pub mod policy;
pub mod sanitize;
pub mod value_object;

pub use audit::AuditEvent;
pub use policy::{
    BoundaryDefaults, ChannelCategory, ChannelPattern, ChannelPolicy, EffectiveLimits, Whitelist,
    WhitelistDocument, WhitelistError,
};
pub use sanitize::sanitize_text;
pub use value_object::{AuditOutcome, ChannelName, ChannelNameError, CorrelationId};
