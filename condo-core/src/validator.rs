//! The service-document schema validator seam.
//!
//! The validator itself is consumed as a black-box transform: this
//! module defines the trait the template expander calls through and
//! ships one intentionally minimal implementation so the crate is
//! runnable standalone. An operator embedding `condo-core` in a larger
//! system swaps in a real JSON-schema-backed validator behind the same
//! trait.

/// Validates an expanded service document.
pub trait ServiceDocumentValidator: Send + Sync {
    fn validate(&self, doc: &serde_json::Value) -> Result<(), String>;
}

/// A minimal stand-in validator: requires the document be a JSON object
/// with a `name` string field and an `environment` array field. Not a
/// full schema — a faithful placeholder for the externally-supplied
/// validator this crate does not implement.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimalSchemaValidator;

impl ServiceDocumentValidator for MinimalSchemaValidator {
    fn validate(&self, doc: &serde_json::Value) -> Result<(), String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| "document must be a JSON object".to_string())?;

        match obj.get("name") {
            Some(serde_json::Value::String(_)) => {}
            _ => return Err("document is missing a string 'name' field".to_string()),
        }

        match obj.get("environment") {
            Some(serde_json::Value::Array(_)) => {}
            _ => return Err("document is missing an 'environment' array field".to_string()),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed_document() {
        let v = MinimalSchemaValidator;
        let doc = json!({"name": "app", "environment": [{"HOST": "10.0.0.1"}]});
        assert!(v.validate(&doc).is_ok());
    }

    #[test]
    fn rejects_missing_environment() {
        let v = MinimalSchemaValidator;
        let doc = json!({"name": "app"});
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_non_object() {
        let v = MinimalSchemaValidator;
        assert!(v.validate(&json!([1, 2, 3])).is_err());
    }
}
