//! Validator plugin registration surface: a factory trait registered under
//! the `validator` plugin kind, resolved by `ValidatorConfig::validator_type`
//! (or by `name` when `validator_type == "custom"`).

use crucible_core::Validator;

/// Constructs fresh [`Validator`] instances. Registered once per validator
/// kind/name; `create` is called for every test that uses it, since a
/// validator accumulates per-invocation state.
pub trait ValidatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Validator>;
}

impl<F> ValidatorFactory for F
where
    F: Fn() -> Box<dyn Validator> + Send + Sync,
{
    fn create(&self) -> Box<dyn Validator> {
        (self)()
    }
}
