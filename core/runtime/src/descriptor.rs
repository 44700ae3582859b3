// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

/// Metadata for one contract operation.
///
/// The generated name encodes return type, contract, method and parameter
/// types, e.g. `u64 Counter.add(u64)`, and is what travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    contract: &'static str,
    name: &'static str,
    generated_name: String,
    parameter_types: Vec<String>,
    return_type: String,
    is_async: bool,
}

// type names coming from stringify! carry spaces around punctuation
fn normalize(ty: &str) -> String {
    ty.split_whitespace().collect()
}

impl MethodDescriptor {
    pub fn new(
        contract: &'static str,
        name: &'static str,
        parameter_types: &[&str],
        return_type: &str,
        is_async: bool,
    ) -> Self {
        let parameter_types: Vec<String> = parameter_types.iter().map(|t| normalize(t)).collect();
        let return_type = match normalize(return_type) {
            t if t.is_empty() => "()".to_string(),
            t => t,
        };
        let generated_name = format!(
            "{} {}.{}({})",
            return_type,
            contract,
            name,
            parameter_types.join(",")
        );

        MethodDescriptor {
            contract,
            name,
            generated_name,
            parameter_types,
            return_type,
            is_async,
        }
    }

    pub fn contract(&self) -> &'static str {
        self.contract
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn generated_name(&self) -> &str {
        &self.generated_name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn returns_value(&self) -> bool {
        self.return_type != "()"
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }
}

/// All operations of a contract, indexed by generated name and by
/// method name.
#[derive(Debug, Clone)]
pub struct MethodDescriptorCollection {
    contract: &'static str,
    methods: Vec<Arc<MethodDescriptor>>,
    by_generated_name: HashMap<String, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl MethodDescriptorCollection {
    pub fn new(contract: &'static str, methods: Vec<MethodDescriptor>) -> Self {
        let methods: Vec<Arc<MethodDescriptor>> = methods.into_iter().map(Arc::new).collect();
        let by_generated_name = methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.generated_name.clone(), i))
            .collect();
        let by_name = methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name, i))
            .collect();

        MethodDescriptorCollection {
            contract,
            methods,
            by_generated_name,
            by_name,
        }
    }

    pub fn contract(&self) -> &'static str {
        self.contract
    }

    pub fn get(&self, generated_name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.by_generated_name
            .get(generated_name)
            .map(|i| &self.methods[*i])
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.by_name.get(name).map(|i| &self.methods[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods.iter()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_name() {
        let d = MethodDescriptor::new(
            "Directory",
            "lookup",
            &["String", "Option < u32 >"],
            "Vec < String >",
            true,
        );
        assert_eq!(
            d.generated_name(),
            "Vec<String> Directory.lookup(String,Option<u32>)"
        );
        assert_eq!(d.parameter_types(), &["String", "Option<u32>"]);
        assert!(d.returns_value());
        assert!(d.is_async());
    }

    #[test]
    fn test_unit_return() {
        let d = MethodDescriptor::new("Directory", "changed", &["String"], "", false);
        assert_eq!(d.generated_name(), "() Directory.changed(String)");
        assert!(!d.returns_value());
    }

    #[test]
    fn test_collection_lookup() {
        let collection = MethodDescriptorCollection::new(
            "Counter",
            vec![
                MethodDescriptor::new("Counter", "add", &["u64"], "u64", true),
                MethodDescriptor::new("Counter", "reset", &[], "", true),
            ],
        );

        assert_eq!(collection.len(), 2);
        assert_eq!(collection.contract(), "Counter");
        assert_eq!(
            collection.get("u64 Counter.add(u64)").map(|d| d.name()),
            Some("add")
        );
        assert_eq!(
            collection.by_name("reset").map(|d| d.generated_name()),
            Some("() Counter.reset()")
        );
        assert!(collection.get("u64 Counter.add(u32)").is_none());
    }
}
