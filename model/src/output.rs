/*!

Deferred values. An [`Output`] is a value that may depend on attributes which only exist once
other resources have been materialized, such as an ARN or an issuer URL. Outputs are combined with
explicit combinators (`map`, `try_map`, `zip`, `all`) and the set of attributes they read is
tracked so that the stack can derive its dependency graph from them.

!*/

use crate::error::{self, Error, Result};
use crate::FieldRef;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Something that can answer "what are the attributes of resource `name`?". Returns `None` when the
/// resource has not been materialized, in which case anything depending on it is unknown.
pub trait AttributeSource {
    fn attributes(&self, resource: &str) -> Option<&Map<String, Value>>;
}

/// An `AttributeSource` in which nothing has been materialized.
#[derive(Clone, Copy, Debug, Default)]
pub struct NothingMaterialized;

impl AttributeSource for NothingMaterialized {
    fn attributes(&self, _: &str) -> Option<&Map<String, Value>> {
        None
    }
}

type Eval<T> = dyn Fn(&dyn AttributeSource) -> Result<Option<T>> + Send + Sync;

fn evaluator<T, F>(f: F) -> Arc<Eval<T>>
where
    F: Fn(&dyn AttributeSource) -> Result<Option<T>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A value of type `T` that is computed from zero or more resource attributes.
pub struct Output<T> {
    references: BTreeSet<FieldRef>,
    eval: Arc<Eval<T>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            references: self.references.clone(),
            eval: Arc::clone(&self.eval),
        }
    }
}

impl<T> Debug for Output<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("references", &self.references)
            .finish()
    }
}

impl<T> Display for Output<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.references.is_empty() {
            return write!(f, "<known>");
        }
        let references: Vec<String> = self.references.iter().map(|r| r.to_string()).collect();
        write!(f, "<computed from {}>", references.join(", "))
    }
}

impl<T> Output<T>
where
    T: Send + Sync + 'static,
{
    /// An output whose value is available immediately.
    pub fn known(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            references: BTreeSet::new(),
            eval: evaluator(move |_| Ok(Some(value.clone()))),
        }
    }

    /// An output that reads `field` from the attributes of `resource` once it exists.
    pub fn attribute<S1, S2>(resource: S1, field: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        T: DeserializeOwned,
    {
        let field_ref = FieldRef::new(resource, field);
        let lookup = field_ref.clone();
        Self {
            references: BTreeSet::from([field_ref]),
            eval: evaluator(move |source| {
                let attributes = match source.attributes(&lookup.resource) {
                    None => return Ok(None),
                    Some(some) => some,
                };
                let value = attributes
                    .get(&lookup.field)
                    .context(error::MissingAttributeSnafu {
                        resource: &lookup.resource,
                        field: &lookup.field,
                    })?;
                let typed = serde_json::from_value(value.clone()).context(
                    error::AttributeTypeSnafu {
                        resource: &lookup.resource,
                        field: &lookup.field,
                    },
                )?;
                Ok(Some(typed))
            }),
        }
    }

    /// Compute the value. `Ok(None)` means at least one referenced resource is not materialized.
    pub fn resolve(&self, source: &dyn AttributeSource) -> Result<Option<T>> {
        (self.eval)(source)
    }

    /// The attributes this output reads.
    pub fn references(&self) -> impl Iterator<Item = &FieldRef> {
        self.references.iter()
    }

    /// The names of the resources this output reads from.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.references
            .iter()
            .map(|field_ref| field_ref.resource.clone())
            .collect()
    }

    /// True when the value does not depend on any resource.
    pub fn is_known(&self) -> bool {
        self.references.is_empty()
    }

    /// Transform the value once it is known.
    pub fn map<U, F>(self, f: F) -> Output<U>
    where
        U: Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let eval = self.eval;
        Output {
            references: self.references,
            eval: evaluator(move |source| Ok(eval(source)?.map(&f))),
        }
    }

    /// Transform the value with a function that may fail. A failure surfaces as an error when the
    /// output is resolved.
    pub fn try_map<U, E, F>(self, f: F) -> Output<U>
    where
        U: Send + Sync + 'static,
        E: Display,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        let eval = self.eval;
        Output {
            references: self.references,
            eval: evaluator(move |source| match eval(source)? {
                None => Ok(None),
                Some(value) => f(value).map(Some).map_err(|e| {
                    Error::from(
                        error::ComputationSnafu {
                            message: e.to_string(),
                        }
                        .build(),
                    )
                }),
            }),
        }
    }

    /// Combine two outputs. The result is known when both are.
    pub fn zip<U>(self, other: Output<U>) -> Output<(T, U)>
    where
        U: Send + Sync + 'static,
    {
        let mut references = self.references;
        references.extend(other.references);
        let left = self.eval;
        let right = other.eval;
        Output {
            references,
            eval: evaluator(move |source| {
                // Evaluate both sides so that an error on either side is never masked by the
                // other side being unknown.
                let left = left(source)?;
                let right = right(source)?;
                Ok(left.zip(right))
            }),
        }
    }

    /// Combine a list of outputs into an output of a list, preserving order.
    pub fn all(outputs: Vec<Output<T>>) -> Output<Vec<T>> {
        let references = outputs
            .iter()
            .flat_map(|output| output.references.iter().cloned())
            .collect();
        let evals: Vec<Arc<Eval<T>>> = outputs.into_iter().map(|output| output.eval).collect();
        Output {
            references,
            eval: evaluator(move |source| {
                let mut values = Vec::with_capacity(evals.len());
                let mut unknown = false;
                for eval in &evals {
                    match eval(source)? {
                        Some(value) => values.push(value),
                        None => unknown = true,
                    }
                }
                Ok(if unknown { None } else { Some(values) })
            }),
        }
    }

    /// Serialize the value into its JSON form.
    pub fn into_json(self) -> Output<Value>
    where
        T: Serialize,
    {
        self.try_map(|value| serde_json::to_value(value))
    }
}

impl From<&str> for Output<String> {
    fn from(value: &str) -> Self {
        Output::known(value.to_string())
    }
}

impl From<String> for Output<String> {
    fn from(value: String) -> Self {
        Output::known(value)
    }
}

#[cfg(test)]
mod test {
    use super::{AttributeSource, NothingMaterialized, Output};
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Materialized(HashMap<String, Map<String, Value>>);

    impl Materialized {
        fn with(mut self, resource: &str, attributes: Value) -> Self {
            if let Value::Object(map) = attributes {
                self.0.insert(resource.to_string(), map);
            }
            self
        }
    }

    impl AttributeSource for Materialized {
        fn attributes(&self, resource: &str) -> Option<&Map<String, Value>> {
            self.0.get(resource)
        }
    }

    #[test]
    fn known_values_resolve_without_attributes() {
        let output = Output::known(3u32).map(|n| n * 2);
        assert!(output.is_known());
        assert_eq!(output.resolve(&NothingMaterialized).unwrap(), Some(6));
    }

    #[test]
    fn attributes_are_unknown_until_materialized() {
        let arn = Output::<String>::attribute("eks-role", "arn");
        assert_eq!(arn.dependencies().into_iter().collect::<Vec<_>>(), ["eks-role"]);
        assert_eq!(arn.resolve(&NothingMaterialized).unwrap(), None);

        let source = Materialized::default().with("eks-role", json!({"arn": "arn:aws:iam::1:role/r"}));
        assert_eq!(
            arn.resolve(&source).unwrap().as_deref(),
            Some("arn:aws:iam::1:role/r")
        );
    }

    #[test]
    fn missing_or_mistyped_attributes_are_errors() {
        let source = Materialized::default().with("vpc", json!({"vpcId": 7}));
        assert!(Output::<String>::attribute("vpc", "vpcId")
            .resolve(&source)
            .is_err());
        assert!(Output::<String>::attribute("vpc", "publicSubnetIds")
            .resolve(&source)
            .is_err());
    }

    #[test]
    fn zip_needs_both_sides() {
        let private = Output::<Vec<String>>::attribute("vpc", "privateSubnetIds");
        let public = Output::<Vec<String>>::attribute("vpc", "publicSubnetIds");
        let joined = private.zip(public).map(|(mut private, public)| {
            private.extend(public);
            private
        });
        assert_eq!(joined.references().count(), 2);
        assert_eq!(joined.resolve(&NothingMaterialized).unwrap(), None);

        let source = Materialized::default().with(
            "vpc",
            json!({"privateSubnetIds": ["c", "a"], "publicSubnetIds": ["b"]}),
        );
        assert_eq!(
            joined.resolve(&source).unwrap(),
            Some(vec!["c".to_string(), "a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn all_preserves_order() {
        let outputs = vec![
            Output::known("x".to_string()),
            Output::<String>::attribute("a", "name"),
            Output::known("z".to_string()),
        ];
        let all = Output::all(outputs);
        assert_eq!(all.resolve(&NothingMaterialized).unwrap(), None);
        let source = Materialized::default().with("a", json!({"name": "y"}));
        assert_eq!(
            all.resolve(&source).unwrap(),
            Some(vec!["x".to_string(), "y".to_string(), "z".to_string()])
        );
    }

    #[test]
    fn try_map_failures_surface_on_resolve() {
        let output = Output::known(String::from("not-an-arn"))
            .try_map(|s| if s.starts_with("arn:") { Ok(s) } else { Err("bad arn") });
        let err = output.resolve(&NothingMaterialized).unwrap_err();
        assert!(err.to_string().contains("bad arn"));
    }
}
