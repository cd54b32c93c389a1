use crate::error::{self, Result};
use crate::{Configuration, Output};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

/// A kind of cloud resource, e.g. an IAM role or a launch template.
///
/// - `Args` is what a declaration asks for. Arguments are recorded in the stack state and diffed
///   against the next declaration.
/// - `Attributes` is what the provider reports back once the resource exists (ids, ARNs, generated
///   names). Other resources read these through [`Output`]s.
pub trait ResourceKind: Send + Sync + 'static {
    /// The type token recorded in the state, e.g. `aws:eks:Cluster`.
    const TYPE: &'static str;

    /// JSON pointers into `Args` whose change cannot be applied in place.
    const REPLACE_ON_CHANGES: &'static [&'static str] = &[];

    type Args: Configuration + PartialEq;
    type Attributes: Configuration;

    /// Reject arguments that the cloud API would reject anyway, before anything is submitted.
    fn validate(_args: &Self::Args) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Per-declaration behaviour that is not part of the resource arguments.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOptions {
    /// Additional argument paths (JSON pointers) that force replacement when they change.
    pub replace_on_changes: Vec<String>,

    /// Delete the old resource before creating its replacement. The default creates the
    /// replacement first.
    pub delete_before_replace: bool,

    /// Explicit ordering edges in addition to the ones implied by argument references.
    pub depends_on: Vec<String>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_on_changes<S: Into<String>>(mut self, path: S) -> Self {
        self.replace_on_changes.push(path.into());
        self
    }

    pub fn delete_before_replace(mut self, value: bool) -> Self {
        self.delete_before_replace = value;
        self
    }

    pub fn depends_on<S: Into<String>>(mut self, resource: S) -> Self {
        self.depends_on.push(resource.into());
        self
    }
}

/// A typed handle to a declared resource, used to reference its attributes.
pub struct Resource<K> {
    name: String,
    kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Resource<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: PhantomData,
        }
    }
}

impl<K> Debug for Resource<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("name", &self.name).finish()
    }
}

impl<K: ResourceKind> Resource<K> {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            kind: PhantomData,
        }
    }

    /// The logical name of the resource.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A deferred reference to one of the resource's attributes.
    pub fn attribute<T>(&self, field: &str) -> Output<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Output::attribute(self.name.as_str(), field)
    }
}

/// A type-erased resource declaration as held by the [`crate::Stack`].
#[derive(Clone)]
pub struct Descriptor {
    name: String,
    kind: &'static str,
    args: Output<Value>,
    options: ResourceOptions,
    replace_triggers: Vec<String>,
    validate: fn(&Value) -> std::result::Result<(), String>,
}

impl Debug for Descriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("options", &self.options)
            .finish()
    }
}

fn validate_erased<K: ResourceKind>(args: &Value) -> std::result::Result<(), String> {
    let args = K::Args::from_value(args.clone()).map_err(|e| e.to_string())?;
    K::validate(&args)
}

impl Descriptor {
    pub(crate) fn new<K: ResourceKind>(
        name: String,
        args: Output<K::Args>,
        options: ResourceOptions,
    ) -> Self {
        let mut replace_triggers: Vec<String> =
            K::REPLACE_ON_CHANGES.iter().map(|s| s.to_string()).collect();
        for path in &options.replace_on_changes {
            if !replace_triggers.contains(path) {
                replace_triggers.push(path.clone());
            }
        }
        Self {
            name,
            kind: K::TYPE,
            args: args.into_json(),
            options,
            replace_triggers,
            validate: validate_erased::<K>,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn args(&self) -> &Output<Value> {
        &self.args
    }

    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    /// Argument paths whose change forces replacement, from the kind and the options combined.
    pub fn replace_triggers(&self) -> &[String] {
        &self.replace_triggers
    }

    /// Every resource this one must be ordered after.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut dependencies = self.args.dependencies();
        dependencies.extend(self.options.depends_on.iter().cloned());
        dependencies
    }

    /// Check resolved arguments against the kind's rules.
    pub fn validate_args(&self, args: &Value) -> Result<()> {
        (self.validate)(args).map_err(|message| {
            error::ValidationSnafu {
                resource: &self.name,
                message,
            }
            .build()
            .into()
        })
    }

    /// Whether any of the `changed` argument paths is one that cannot be applied in place.
    pub fn requires_replacement<S: AsRef<str>>(&self, changed: &[S]) -> bool {
        changed.iter().any(|path| {
            let path = path.as_ref();
            self.replace_triggers.iter().any(|trigger| {
                path == trigger
                    || path.starts_with(&format!("{}/", trigger))
                    || trigger.starts_with(&format!("{}/", path))
            })
        })
    }
}

/// Compare two argument documents and return the JSON pointers of every value that differs.
/// Objects are compared key by key; arrays and scalars are compared as a whole. A key that is
/// absent on one side and `null` on the other is not a change.
pub fn changed_paths(old: &Value, new: &Value) -> Vec<String> {
    let mut changed = Vec::new();
    collect_changes("", old, new, &mut changed);
    changed
}

fn collect_changes(prefix: &str, old: &Value, new: &Value, changed: &mut Vec<String>) {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
            for key in keys {
                let path = format!("{}/{}", prefix, escape_pointer(key));
                let old = old.get(key).unwrap_or(&Value::Null);
                let new = new.get(key).unwrap_or(&Value::Null);
                collect_changes(&path, old, new, changed);
            }
        }
        (old, new) if old == new => {}
        _ => changed.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// The action an engine takes on a resource.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub enum ResourceAction {
    Create,
    Update,
    Delete,
}

serde_plain::derive_fromstr_from_deserialize!(ResourceAction, |e| -> crate::Error {
    crate::error::OpaqueError::SerdePlain { source: e }.into()
});
serde_plain::derive_display_from_serialize!(ResourceAction);

/// When an operation fails, this records whether cloud resources were left behind.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub enum ErrorResources {
    /// Resources were left behind and there is no way to destroy them.
    Orphaned,

    /// Resources were left behind and a later delete may be able to clean them up.
    Remaining,

    /// Nothing was left behind.
    Clear,

    /// It is not known whether anything was left behind.
    Unknown,
}

impl Default for ErrorResources {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ErrorResources {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorResources::Orphaned => "An error left resources that cannot be destroyed",
            ErrorResources::Remaining => "An error left resources that can be destroyed",
            ErrorResources::Clear => "An error occurred but no resources were left behind",
            ErrorResources::Unknown => "An error occurred but it is unknown if resources exist",
        }
    }
}

#[cfg(test)]
mod test {
    use super::changed_paths;
    use serde_json::json;

    #[test]
    fn identical_documents_have_no_changes() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert!(changed_paths(&doc, &doc).is_empty());
    }

    #[test]
    fn nested_changes_are_reported_as_pointers() {
        let old = json!({
            "launchTemplate": {"name": "lt", "version": "1"},
            "subnets": ["a", "b"],
            "tags": null
        });
        let new = json!({
            "launchTemplate": {"name": "lt", "version": "2"},
            "subnets": ["b", "a"]
        });
        assert_eq!(
            changed_paths(&old, &new),
            vec!["/launchTemplate/version".to_string(), "/subnets".to_string()]
        );
    }

    #[test]
    fn keys_are_escaped() {
        let old = json!({"a/b": 1, "c~d": 1});
        let new = json!({"a/b": 2, "c~d": 2});
        assert_eq!(changed_paths(&old, &new), vec!["/a~1b", "/c~0d"]);
    }

    #[test]
    fn type_changes_are_leaf_changes() {
        assert_eq!(changed_paths(&json!({"a": {"b": 1}}), &json!({"a": 3})), vec!["/a"]);
        assert_eq!(changed_paths(&json!(1), &json!(2)), vec!["/"]);
    }
}
