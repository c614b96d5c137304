//! Message specifications and the parameter-validation capability.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::ValidationErrors;
use crate::id::MessageId;

/// Validates raw message parameters into cleaned, structured parameters.
///
/// Plain functions participate via [`FnValidator`], usually through
/// [`MessageSpec::validator_fn`]:
///
/// ```ignore
/// MessageSpec::new("resize").validator_fn(|raw| {
///     match raw.get("width").and_then(Value::as_i64) {
///         Some(w) if w > 0 => Ok(json!({ "width": w })),
///         _ => Err(ValidationErrors::from_message("width must be a positive integer")),
///     }
/// });
/// ```
pub trait Validator: Send + Sync + 'static {
    /// Validate raw parameters, returning the cleaned value or field-level
    /// errors.
    fn validate(&self, raw: &Value) -> Result<Value, ValidationErrors>;
}

/// Adapter wrapping a plain function as a [`Validator`].
pub struct FnValidator<F> {
    f: F,
}

impl<F> FnValidator<F> {
    /// Wrap a function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value) -> Result<Value, ValidationErrors> + Send + Sync + 'static,
{
    fn validate(&self, raw: &Value) -> Result<Value, ValidationErrors> {
        (self.f)(raw)
    }
}

/// Validator that filters out all incoming data: always valid, always
/// yields an empty object as cleaned parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyValidator;

impl Validator for EmptyValidator {
    fn validate(&self, _raw: &Value) -> Result<Value, ValidationErrors> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

/// Validator that round-trips the raw parameters through a typed shape.
///
/// Unknown fields are filtered out by the round-trip; missing or mistyped
/// fields fail validation.
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct ClickParams {
///     pos_x: i64,
///     pos_y: i64,
/// }
///
/// let spec = MessageSpec::new("click").validator(TypedValidator::<ClickParams>::new());
/// ```
pub struct TypedValidator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedValidator<T> {
    /// Create a new typed validator.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Validator for TypedValidator<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn validate(&self, raw: &Value) -> Result<Value, ValidationErrors> {
        let typed: T = serde_json::from_value(raw.clone())
            .map_err(|err| ValidationErrors::from_message(err.to_string()))?;
        serde_json::to_value(typed)
            .map_err(|err| ValidationErrors::from_message(err.to_string()))
    }
}

/// Immutable descriptor of one message type.
///
/// A spec knows its unique id (which may encode a group via `__`), a
/// human-friendly verb, a sort rank, how to validate raw parameters, how to
/// reshape cleaned parameters before the handler sees them, and optionally
/// how to project parameters for audit logging.
///
/// Built with chained setters and registered once:
///
/// ```ignore
/// builder.message(
///     MessageSpec::new("edit__resize")
///         .verb("Resize window")
///         .rank(900)
///         .validator(TypedValidator::<ResizeParams>::new())
///         .params_wrapper(|params| json!({ "edit_fields": params })),
/// );
/// ```
pub struct MessageSpec {
    id: MessageId,
    verb: String,
    rank: i32,
    validator: Arc<dyn Validator>,
    params_wrapper: Option<Arc<dyn Fn(Value) -> Value + Send + Sync>>,
    dehydrator: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
}

impl MessageSpec {
    /// Create a spec for `id`. The verb defaults to the id itself, the rank
    /// to 0, and the validator to [`EmptyValidator`].
    pub fn new(id: impl Into<MessageId>) -> Self {
        let id = id.into();
        let verb = id.as_str().to_owned();
        Self {
            id,
            verb,
            rank: 0,
            validator: Arc::new(EmptyValidator),
            params_wrapper: None,
            dehydrator: None,
        }
    }

    /// Set the human-friendly display label.
    pub fn verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = verb.into();
        self
    }

    /// Set the sort priority (lower ranks sort first).
    pub fn rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    /// Set the parameter validator.
    pub fn validator(mut self, validator: impl Validator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Set a plain function as the parameter validator.
    pub fn validator_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, ValidationErrors> + Send + Sync + 'static,
    {
        self.validator(FnValidator::new(f))
    }

    /// Set a structural transform applied to cleaned parameters before the
    /// handler sees them.
    pub fn params_wrapper(mut self, wrapper: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.params_wrapper = Some(Arc::new(wrapper));
        self
    }

    /// Set a projection of the wrapped parameters recorded for audit
    /// logging and observers.
    pub fn dehydrate(mut self, dehydrator: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.dehydrator = Some(Arc::new(dehydrator));
        self
    }

    /// The message id.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// The display label.
    pub fn verb_label(&self) -> &str {
        &self.verb
    }

    /// The sort priority.
    pub fn rank_value(&self) -> i32 {
        self.rank
    }

    /// Whether the id encodes a group path.
    pub fn is_grouped(&self) -> bool {
        self.id.is_grouped()
    }

    /// Validate raw parameters.
    pub(crate) fn clean_params(&self, raw: &Value) -> Result<Value, ValidationErrors> {
        self.validator.validate(raw)
    }

    /// Apply the params wrapper, if any.
    pub(crate) fn wrap_params(&self, cleaned: Value) -> Value {
        match &self.params_wrapper {
            Some(wrapper) => wrapper(cleaned),
            None => cleaned,
        }
    }

    /// Apply the dehydrate projection, if any.
    pub(crate) fn dehydrated(&self, params: &Value) -> Option<Value> {
        self.dehydrator.as_ref().map(|dehydrator| dehydrator(params))
    }
}

impl std::fmt::Debug for MessageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSpec")
            .field("id", &self.id)
            .field("verb", &self.verb)
            .field("rank", &self.rank)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for MessageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.verb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn spec_defaults() {
        let spec = MessageSpec::new("minimize");
        assert_eq!(spec.id().as_str(), "minimize");
        assert_eq!(spec.verb_label(), "minimize");
        assert_eq!(spec.rank_value(), 0);
        assert!(!spec.is_grouped());
    }

    #[test]
    fn spec_builder_chain() {
        let spec = MessageSpec::new("edit__resize")
            .verb("Resize window")
            .rank(900)
            .params_wrapper(|params| json!({ "edit_fields": params }));

        assert!(spec.is_grouped());
        assert_eq!(spec.verb_label(), "Resize window");
        assert_eq!(format!("{}", spec), "Resize window");
        assert_eq!(
            spec.wrap_params(json!({ "width": 10 })),
            json!({ "edit_fields": { "width": 10 } })
        );
    }

    #[test]
    fn empty_validator_filters_everything() {
        let spec = MessageSpec::new("cancel");
        let cleaned = spec.clean_params(&json!({ "anything": true })).unwrap();
        assert_eq!(cleaned, json!({}));
    }

    #[test]
    fn typed_validator_accepts_and_rejects() {
        #[derive(Serialize, Deserialize)]
        struct ClickParams {
            pos_x: i64,
            pos_y: i64,
        }

        let validator = TypedValidator::<ClickParams>::new();

        let cleaned = validator
            .validate(&json!({ "pos_x": 3, "pos_y": 4 }))
            .unwrap();
        assert_eq!(cleaned, json!({ "pos_x": 3, "pos_y": 4 }));

        let err = validator.validate(&json!({ "pos_x": 3 })).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn dehydrate_projection() {
        let spec = MessageSpec::new("edit")
            .dehydrate(|params| json!({ "field_count": params.as_object().map_or(0, |o| o.len()) }));

        let projected = spec.dehydrated(&json!({ "a": 1, "b": 2 })).unwrap();
        assert_eq!(projected, json!({ "field_count": 2 }));

        let bare = MessageSpec::new("edit");
        assert!(bare.dehydrated(&json!({})).is_none());
    }
}
