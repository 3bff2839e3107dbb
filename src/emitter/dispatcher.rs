//! Feature-flag dispatcher, spec §4.9 (C11). Wraps the register and
//! no-register emitters and routes each `send` to one of them based on a
//! flag polled fresh every call — no caching, so flipping the flag mid-run
//! changes routing on the very next dataset.

use super::{parse_v4_payload, EmitSummary, NoRegisterEmitter, RegisterEmitter};
use crate::error::AgentError;
use crate::model::DataV4;

/// Named boolean source, spec §6 "Feature flags". Implementations back this
/// with whatever config/remote-flag mechanism the deployment uses; the core
/// only needs synchronous reads.
pub trait FeatureFlagSource: Send + Sync {
    fn is_enabled(&self, flag: &str) -> bool;
}

pub const FLAG_PROTOCOL_V4: &str = "protocol_v4";
pub const FLAG_REGISTER_ENABLED: &str = "register_enabled";
pub const FLAG_REGISTER_DEPRECATED: &str = "register_deprecated";

pub struct Dispatcher<'a> {
    flags: &'a dyn FeatureFlagSource,
    register: RegisterEmitter<'a>,
    noregister: NoRegisterEmitter<'a>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        flags: &'a dyn FeatureFlagSource,
        register: RegisterEmitter<'a>,
        noregister: NoRegisterEmitter<'a>,
    ) -> Self {
        Self {
            flags,
            register,
            noregister,
        }
    }

    /// `Send(request)`, spec §4.9. Rejects outright (single warning, no
    /// emission) on the §8 boundary cases: an empty payload, `protocol_v4`
    /// disabled, or `register_deprecated` set while register mode would
    /// otherwise have been chosen.
    pub async fn send(&self, payload: DataV4) -> Result<EmitSummary, AgentError> {
        if let Err(err) = parse_v4_payload(&payload, self.flags) {
            tracing::warn!(error = %err, "payload rejected before emission");
            return Err(err);
        }

        let register_enabled = self.flags.is_enabled(FLAG_REGISTER_ENABLED);
        if register_enabled && self.flags.is_enabled(FLAG_REGISTER_DEPRECATED) {
            tracing::warn!("register-mode payload rejected: register_deprecated flag is set");
            return Err(AgentError::Parse("register_deprecated flag is set".to_string()));
        }
        Ok(if register_enabled {
            self.register.emit(payload).await
        } else {
            self.noregister.emit(payload).await
        })
    }
}
