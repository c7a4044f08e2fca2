// utils.rs
use metrics::gauge;
use tracing::info;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{devices::DeviceStore, metrics::WS_CLIENTS};

pub fn cleanup_client_connection(client_id: Uuid, store: &DeviceStore) {
    store.unsubscribe(&client_id);
    gauge!(WS_CLIENTS).set(store.subscribers() as f64);
    info!("Client {} disconnected", client_id);
}

/// First human-readable message out of a validation failure.
pub fn describe_validation_errors(errors: &ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{INVALID_STATE, MotorRequest};
    use validator::Validate;

    #[test]
    fn validation_message_is_surfaced() {
        let errors = MotorRequest { state: None }.validate().unwrap_err();
        assert_eq!(describe_validation_errors(&errors), INVALID_STATE);

        let errors = MotorRequest { state: Some("sideways".into()) }.validate().unwrap_err();
        assert_eq!(describe_validation_errors(&errors), INVALID_STATE);
    }
}
