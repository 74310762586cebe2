use utoipa::openapi::{
    OpenApi,
    security::{ApiKey, ApiKeyValue, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::platform::middleware::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};

/// Serves the OpenAPI document at `/api-docs/openapi.json` and the UI at
/// `/swagger-ui`.
pub fn create_swagger_ui(mut openapi: OpenApi) -> SwaggerUi {
    let components = openapi.components.get_or_insert_with(Default::default);
    components.add_security_scheme(
        "actorId",
        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(ACTOR_ID_HEADER))),
    );
    components.add_security_scheme(
        "actorRole",
        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(ACTOR_ROLE_HEADER))),
    );

    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi)
}
