//! State of the consumers registered by method bodies.
//!
//! Consumers live in tables owned by the analyzer and are referenced from
//! dependency nodes by index (see [`super::node::Consumer`]), so delivering a type
//! never needs a callback that borrows the analyzer.

use rustc_hash::FxHashSet;

use crate::model::{CallLocation, ClassSource, MethodDescriptor, MethodReference};

use super::node::DependencyNodeId;

/// Routes exception types thrown inside one basic block.
#[derive(Debug, Clone)]
pub(crate) struct ExceptionConsumer {
    /// Active try/catch regions in declared order: filter class (`None` catches
    /// everything) and the node of the handler's exception variable.
    pub catches: Vec<(Option<String>, Option<DependencyNodeId>)>,
    /// Node of the exceptions escaping the method
    pub thrown: DependencyNodeId,
}

impl ExceptionConsumer {
    /// Returns the node an exception of runtime type `type_name` lands in, or `None`
    /// when it is caught by a handler that ignores the exception value.
    pub fn route(&self, source: &impl ClassSource, type_name: &str) -> Option<DependencyNodeId> {
        for (filter, node) in &self.catches {
            let accepts = match filter {
                None => true,
                Some(class) => source.is_super_type(class, type_name).unwrap_or(false),
            };
            if accepts {
                return *node;
            }
        }
        Some(self.thrown)
    }
}

/// Resolves the targets of one virtual call site.
#[derive(Debug, Clone)]
pub(crate) struct VirtualCallConsumer {
    /// Owner of the statically resolved method; receivers outside it are ignored
    pub filter_class: String,
    pub descriptor: MethodDescriptor,
    /// Actual argument nodes, slot 0 being the instance
    pub parameters: Vec<Option<DependencyNodeId>>,
    pub result: Option<DependencyNodeId>,
    pub location: CallLocation,
    /// Index of the exception consumer of the calling block
    pub exceptions: usize,
    pub known_methods: FxHashSet<MethodReference>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassHolder, ClassSet, OBJECT_CLASS};

    #[test]
    fn test_first_matching_handler_wins() {
        let mut classes = ClassSet::new();
        classes.add(ClassHolder::new(OBJECT_CLASS, None));
        classes.add(ClassHolder::new("Throwable", Some(OBJECT_CLASS)));
        classes.add(ClassHolder::new("IOException", Some("Throwable")));
        classes.add(ClassHolder::new("EOFException", Some("IOException")));

        let consumer = ExceptionConsumer {
            catches: vec![
                (Some("IOException".into()), Some(DependencyNodeId(1))),
                (None, Some(DependencyNodeId(2))),
            ],
            thrown: DependencyNodeId(0),
        };
        assert_eq!(consumer.route(&classes, "EOFException"), Some(DependencyNodeId(1)));
        assert_eq!(consumer.route(&classes, "Throwable"), Some(DependencyNodeId(2)));

        let uncaught = ExceptionConsumer {
            catches: vec![(Some("IOException".into()), None)],
            thrown: DependencyNodeId(0),
        };
        assert_eq!(uncaught.route(&classes, "IOException"), None);
        assert_eq!(uncaught.route(&classes, "Throwable"), Some(DependencyNodeId(0)));
    }
}
