use crate::error::{self, Result};
use crate::graph::topological_layers;
use crate::resource::{Descriptor, Resource, ResourceKind, ResourceOptions};
use crate::{AttributeSource, NothingMaterialized, Output, ProviderContext};
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::ensure;
use std::collections::{BTreeMap, BTreeSet};

/// The declared resource graph of one program, along with its exported outputs.
#[derive(Debug, Clone)]
pub struct Stack {
    context: ProviderContext,
    resources: Vec<Descriptor>,
    exports: Vec<(String, Output<Value>)>,
}

impl Stack {
    pub fn new(context: ProviderContext) -> Self {
        Self {
            context,
            resources: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Declare a resource of kind `K` and return a handle for referencing its attributes.
    pub fn register<K: ResourceKind>(
        &mut self,
        name: &str,
        args: Output<K::Args>,
        options: ResourceOptions,
    ) -> Result<Resource<K>> {
        ensure!(
            self.resource(name).is_none(),
            error::DuplicateResourceSnafu { name }
        );
        debug!("Declaring '{}' of kind '{}'", name, K::TYPE);
        self.resources
            .push(Descriptor::new::<K>(name.to_string(), args, options));
        Ok(Resource::new(name.to_string()))
    }

    /// Declare a named stack output.
    pub fn export<T>(&mut self, name: &str, value: Output<T>)
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.exports.retain(|(existing, _)| existing != name);
        self.exports.push((name.to_string(), value.into_json()));
    }

    /// All declarations in the order they were registered.
    pub fn resources(&self) -> &[Descriptor] {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&Descriptor> {
        self.resources.iter().find(|d| d.name() == name)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.resources.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn exports(&self) -> impl Iterator<Item = (&str, &Output<Value>)> {
        self.exports.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Check that every reference points at a declared resource, that the graph is acyclic and
    /// that every argument set which is already known passes its kind's validation.
    pub fn validate(&self) -> Result<()> {
        let names = self.names();
        for descriptor in &self.resources {
            for dependency in descriptor.dependencies() {
                ensure!(
                    names.contains(&dependency),
                    error::UnknownReferenceSnafu {
                        resource: descriptor.name(),
                        dependency,
                    }
                );
            }
        }
        for (export, value) in &self.exports {
            for dependency in value.dependencies() {
                ensure!(
                    names.contains(&dependency),
                    error::UnknownReferenceSnafu {
                        resource: export,
                        dependency,
                    }
                );
            }
        }
        self.creation_layers()?;
        for descriptor in &self.resources {
            if let Some(args) = descriptor.args().resolve(&NothingMaterialized)? {
                descriptor.validate_args(&args)?;
            }
        }
        Ok(())
    }

    /// The edges of the graph: each resource mapped to the resources it must follow.
    pub fn dependency_map(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.resources
            .iter()
            .map(|d| (d.name().to_string(), d.dependencies()))
            .collect()
    }

    /// Resources grouped into layers, leaves first. Members of a layer do not depend on each other.
    pub fn creation_layers(&self) -> Result<Vec<Vec<String>>> {
        topological_layers(&self.names(), &self.dependency_map())
    }

    /// The creation layers reversed, so that dependents are removed before their dependencies.
    pub fn deletion_layers(&self) -> Result<Vec<Vec<String>>> {
        let mut layers = self.creation_layers()?;
        layers.reverse();
        Ok(layers)
    }

    /// Evaluate the exported outputs. Outputs that cannot be computed yet are left out.
    pub fn resolve_exports(&self, source: &dyn AttributeSource) -> Result<Map<String, Value>> {
        let mut outputs = Map::new();
        for (name, value) in &self.exports {
            if let Some(value) = value.resolve(source)? {
                outputs.insert(name.clone(), value);
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod test {
    use super::Stack;
    use crate::resource::{ResourceKind, ResourceOptions};
    use crate::{Configuration, Output, ProviderContext};
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Map, Value};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Args {
        input: Option<String>,
        size: u32,
    }
    impl Configuration for Args {}

    struct Thing;
    impl ResourceKind for Thing {
        const TYPE: &'static str = "test:thing";
        type Args = Args;
        type Attributes = Map<String, Value>;

        fn validate(args: &Args) -> Result<(), String> {
            if args.size == 0 {
                return Err("size must be positive".to_string());
            }
            Ok(())
        }
    }

    fn args(input: Option<Output<String>>) -> Output<Args> {
        match input {
            None => Output::known(Args {
                input: None,
                size: 1,
            }),
            Some(input) => input.map(|input| Args {
                input: Some(input),
                size: 1,
            }),
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut stack = Stack::new(ProviderContext::default());
        stack
            .register::<Thing>("a", args(None), ResourceOptions::new())
            .unwrap();
        assert!(stack
            .register::<Thing>("a", args(None), ResourceOptions::new())
            .is_err());
    }

    #[test]
    fn layers_follow_references_and_depends_on() {
        let mut stack = Stack::new(ProviderContext::default());
        let a = stack
            .register::<Thing>("a", args(None), ResourceOptions::new())
            .unwrap();
        let b = stack
            .register::<Thing>("b", args(Some(a.attribute("id"))), ResourceOptions::new())
            .unwrap();
        stack
            .register::<Thing>("c", args(None), ResourceOptions::new().depends_on("b"))
            .unwrap();
        stack.export("b_id", b.attribute::<String>("id"));
        stack.validate().unwrap();
        assert_eq!(
            stack.creation_layers().unwrap(),
            vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
        assert_eq!(
            stack.deletion_layers().unwrap(),
            vec![vec!["c".to_string()], vec!["b".to_string()], vec!["a".to_string()]]
        );
    }

    #[test]
    fn unknown_references_are_rejected() {
        let mut stack = Stack::new(ProviderContext::default());
        stack
            .register::<Thing>(
                "a",
                args(Some(Output::attribute("missing", "id"))),
                ResourceOptions::new(),
            )
            .unwrap();
        let err = stack.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn known_arguments_are_validated() {
        let mut stack = Stack::new(ProviderContext::default());
        stack
            .register::<Thing>(
                "a",
                Output::known(Args {
                    input: None,
                    size: 0,
                }),
                ResourceOptions::new(),
            )
            .unwrap();
        let err = stack.validate().unwrap_err();
        assert!(err.to_string().contains("size must be positive"));
    }

    #[test]
    fn exports_are_resolved_when_known() {
        let mut stack = Stack::new(ProviderContext::default());
        stack.export("answer", Output::known(42));
        stack.export("pending", Output::<String>::attribute("a", "id"));
        let outputs = stack.resolve_exports(&crate::NothingMaterialized).unwrap();
        assert_eq!(Value::Object(outputs), json!({"answer": 42}));
    }
}
