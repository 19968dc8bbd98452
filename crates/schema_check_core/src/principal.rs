use uuid::Uuid;

use crate::error::SchemaCheckError;

/// The caller of a check/publish operation.
///
/// Authentication happens upstream; the engine only needs to know who acted
/// and on behalf of which organization, for scoping and for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub actor_id: String,
    pub organization_id: Uuid,
}

impl Principal {
    /// Construct explicitly. There is no implicit or thread-local identity.
    pub fn new(actor_id: impl Into<String>, organization_id: Uuid) -> Self {
        Self {
            actor_id: actor_id.into(),
            organization_id,
        }
    }

    /// Build from the identity headers forwarded by the gateway.
    pub fn from_headers(
        actor_id: Option<&str>,
        organization_id: Option<&str>,
    ) -> Result<Self, SchemaCheckError> {
        let actor_id = actor_id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SchemaCheckError::InvalidInput("missing actor id".into()))?;
        let organization_id = organization_id
            .ok_or_else(|| SchemaCheckError::InvalidInput("missing organization id".into()))?;
        let organization_id = Uuid::parse_str(organization_id.trim()).map_err(|e| {
            SchemaCheckError::InvalidInput(format!("organization id is not a uuid: {e}"))
        })?;
        Ok(Self::new(actor_id, organization_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_headers_ok() {
        let org = Uuid::new_v4();
        let p = Principal::from_headers(Some("alice"), Some(&org.to_string())).unwrap();
        assert_eq!(p.actor_id, "alice");
        assert_eq!(p.organization_id, org);
    }

    #[test]
    fn from_headers_rejects_blank_actor() {
        let org = Uuid::new_v4().to_string();
        let err = Principal::from_headers(Some("  "), Some(&org)).unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn from_headers_rejects_bad_org() {
        let err = Principal::from_headers(Some("alice"), Some("not-a-uuid")).unwrap_err();
        assert!(err.to_string().contains("not a uuid"));
    }
}
