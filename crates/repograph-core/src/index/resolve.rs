//! Call resolution across extracted files
//!
//! Runs once every file has been extracted. Calls that cannot be matched to
//! an element stay dangling.

use std::collections::HashMap;

use super::element::{ElementId, ElementKind, FileExtraction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub resolved: usize,
    pub dangling: usize,
}

struct Node {
    kind: ElementKind,
    contained_by: Option<ElementId>,
}

/// Resolve `calls[*].resolved` in place
pub fn resolve_calls(files: &mut [FileExtraction]) -> ResolutionStats {
    let mut nodes: HashMap<ElementId, Node> = HashMap::new();
    let mut methods: HashMap<(ElementId, String), ElementId> = HashMap::new();
    let mut top_level: HashMap<(String, String), ElementId> = HashMap::new();
    let mut by_name: HashMap<String, Vec<ElementId>> = HashMap::new();

    for file in files.iter() {
        let module_id = file.elements.first().map(|m| m.id.clone());
        for element in &file.elements {
            nodes.insert(
                element.id.clone(),
                Node {
                    kind: element.kind,
                    contained_by: element.contained_by.clone(),
                },
            );
            if element.kind == ElementKind::Module || element.anonymous {
                continue;
            }
            by_name
                .entry(element.name.clone())
                .or_default()
                .push(element.id.clone());
            match (&element.contained_by, element.kind) {
                (Some(class_id), ElementKind::Method) => {
                    methods.insert((class_id.clone(), element.name.clone()), element.id.clone());
                }
                (Some(parent), ElementKind::Function | ElementKind::Class)
                    if Some(parent) == module_id.as_ref() =>
                {
                    top_level
                        .entry((file.path.clone(), element.name.clone()))
                        .or_insert_with(|| element.id.clone());
                }
                _ => {}
            }
        }
    }

    let enclosing_class = |start: &ElementId| -> Option<ElementId> {
        let mut current = Some(start.clone());
        while let Some(id) = current {
            let node = nodes.get(&id)?;
            if node.kind == ElementKind::Class {
                return Some(id);
            }
            current = node.contained_by.clone();
        }
        None
    };

    let mut stats = ResolutionStats::default();
    for file in files.iter_mut() {
        for element in file.elements.iter_mut() {
            let owner = element.id.clone();
            for call in element.calls.iter_mut() {
                let target = call.target.as_str();

                let via_receiver = ["self.", "cls."]
                    .iter()
                    .find_map(|prefix| target.strip_prefix(prefix))
                    .filter(|rest| !rest.contains('.'))
                    .and_then(|method| {
                        let class = enclosing_class(&owner)?;
                        methods.get(&(class, method.to_string())).cloned()
                    });

                let same_file = || {
                    if target.contains('.') {
                        return None;
                    }
                    top_level
                        .get(&(file.path.clone(), target.to_string()))
                        .cloned()
                };

                let unique = || match by_name.get(call.simple_name()) {
                    Some(ids) if ids.len() == 1 => ids.first().cloned(),
                    _ => None,
                };

                call.resolved = via_receiver.or_else(same_file).or_else(unique);
                if call.resolved.is_some() {
                    stats.resolved += 1;
                } else {
                    stats.dangling += 1;
                }
            }
        }
    }

    stats
}
