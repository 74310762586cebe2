use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{enums::ActorRole, platform::app_error::AppError};

/// The authenticated caller, as resolved by the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Actor {
    pub role: ActorRole,
    pub id: i32,
    pub name: String,
}

impl Actor {
    pub fn new(role: ActorRole, id: i32, name: impl Into<String>) -> Self {
        Self {
            role,
            id,
            name: name.into(),
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::ForbiddenResource(
                "Only staff or the shop owner may perform this action".into(),
            ))
        }
    }

    /// Pet owners may only touch their own appointments; staff may touch any.
    pub fn require_access_to(&self, owner_id: i32) -> Result<(), AppError> {
        if self.is_staff() || self.id == owner_id {
            Ok(())
        } else {
            Err(AppError::ForbiddenResource(
                "Appointment does not belong to this pet owner".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pet_owner_is_limited_to_own_appointments() {
        let actor = Actor::new(ActorRole::PetOwner, 7, "Ana");
        assert!(actor.require_access_to(7).is_ok());
        assert!(matches!(
            actor.require_access_to(8),
            Err(AppError::ForbiddenResource(_))
        ));
        assert!(actor.require_staff().is_err());
    }

    #[test]
    fn staff_and_shop_owner_reach_everything() {
        for role in [ActorRole::Staff, ActorRole::Owner] {
            let actor = Actor::new(role, 1, "Front Desk");
            assert!(actor.require_access_to(99).is_ok());
            assert!(actor.require_staff().is_ok());
        }
    }
}
