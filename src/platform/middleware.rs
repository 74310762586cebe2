use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

use crate::{appointments::Actor, enums::ActorRole, platform::app_error::AppError};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";

/// Reads the actor the gateway attached to the request.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let id = header(ACTOR_ID_HEADER)
        .and_then(|raw| raw.parse::<i32>().ok())
        .ok_or(AppError::Unauthorized)?;
    let role = header(ACTOR_ROLE_HEADER)
        .and_then(|raw| raw.parse::<ActorRole>().ok())
        .ok_or(AppError::Unauthorized)?;
    let name = header(ACTOR_NAME_HEADER).unwrap_or_default();

    Ok(Actor::new(role, id, name))
}

/// Makes the caller available to handlers as `Extension<Actor>`.
pub async fn actor_context(mut req: Request, next: Next) -> Result<Response, AppError> {
    let actor = actor_from_headers(req.headers())?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// Same as [`actor_context`], but only lets staff and the shop owner through.
pub async fn staff_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let actor = actor_from_headers(req.headers())?;
    actor.require_staff()?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn parses_complete_actor() {
        let actor = actor_from_headers(&headers(&[
            (ACTOR_ID_HEADER, "42"),
            (ACTOR_ROLE_HEADER, "staff"),
            (ACTOR_NAME_HEADER, "Bea"),
        ]))
        .unwrap();
        assert_eq!(actor, Actor::new(ActorRole::Staff, 42, "Bea"));
    }

    #[test]
    fn rejects_unknown_role_and_missing_id() {
        let unknown_role = headers(&[(ACTOR_ID_HEADER, "1"), (ACTOR_ROLE_HEADER, "admin")]);
        assert!(matches!(
            actor_from_headers(&unknown_role),
            Err(AppError::Unauthorized)
        ));

        let missing_id = headers(&[(ACTOR_ROLE_HEADER, "owner")]);
        assert!(matches!(
            actor_from_headers(&missing_id),
            Err(AppError::Unauthorized)
        ));
    }
}
