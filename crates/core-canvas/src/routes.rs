//! Layer routes: id → index-path lookup.
//!
//! Rebuilt whenever the layer tree changes shape; props-only edits keep the
//! existing routes valid. Paths index into the parallel content/props trees,
//! so one search gives O(depth) access to either side.

use crate::layer::{LayerId, LayerPropsList};
use ahash::AHashMap;

#[derive(Debug, Clone, Default)]
pub struct LayerRoutes {
    map: AHashMap<LayerId, Vec<usize>>,
}

impl LayerRoutes {
    pub fn build(lpl: &LayerPropsList) -> Self {
        let mut routes = Self::default();
        let mut path = Vec::new();
        routes.build_recursive(lpl, &mut path);
        routes
    }

    fn build_recursive(&mut self, lpl: &LayerPropsList, path: &mut Vec<usize>) {
        for (i, props) in lpl.iter().enumerate() {
            path.push(i);
            self.map.insert(props.id, path.clone());
            if let Some(children) = &props.children {
                self.build_recursive(children, path);
            }
            path.pop();
        }
    }

    pub fn search(&self, layer_id: LayerId) -> Option<&[usize]> {
        self.map.get(&layer_id).map(Vec::as_slice)
    }

    pub fn contains(&self, layer_id: LayerId) -> bool {
        self.map.contains_key(&layer_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerProps;
    use std::sync::Arc;

    #[test]
    fn nested_ids_resolve_to_paths() {
        let mut inner = LayerPropsList::new();
        inner.push(Arc::new(LayerProps::new(30, "leaf".into())));
        let mut group = LayerProps::new(20, "group".into());
        group.children = Some(Arc::new(inner));
        let mut root = LayerPropsList::new();
        root.push(Arc::new(LayerProps::new(10, "bottom".into())));
        root.push(Arc::new(group));

        let routes = LayerRoutes::build(&root);
        assert_eq!(routes.search(10), Some(&[0][..]));
        assert_eq!(routes.search(20), Some(&[1][..]));
        assert_eq!(routes.search(30), Some(&[1, 0][..]));
        assert!(routes.search(99).is_none());
    }
}
