use utoipa::OpenApi;
use crate::{handlers, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::status,
        handlers::control_motor,
        handlers::control_led,
        handlers::recognize_speech,
    ),
    components(
        schemas(
            models::Switch,
            models::DeviceState,
            models::MotorRequest,
            models::LedRequest,
            models::ControlResponse,
            models::HealthResponse,
            models::SpeechResponse,
            models::ErrorBody,
        )
    ),
    tags((name = "device-bridge", description = "Serial device control and voice commands"))
)]
pub struct ApiDoc;
