use serde::{Deserialize, Serialize};

use super::{
    binding::{BindGroup, BindGroupLayout},
    error::ResolveError,
    name_registry::NamingPolicy,
};

/// Options for a single resolution call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveOptions {
    pub names: NamingPolicy,
    /// Parse and validate the generated module with naga before returning.
    pub validate: bool,
}

/// The output of a resolution: shader text plus the bind group layouts it
/// expects, indexed by group number.
#[derive(Debug)]
pub struct ResolvedModule {
    pub code: String,
    /// `used_bind_group_layouts[i]` is the layout bound at `@group(i)`.
    pub used_bind_group_layouts: Vec<Option<BindGroupLayout>>,
    /// The automatically created group holding directly referenced resources.
    pub catchall: Option<(u32, BindGroup)>,
}

impl ResolvedModule {
    /// Pairs every used group index with a bind group, taking the catch-all
    /// group from the module and the rest from `groups` (matched by layout).
    pub fn bind_groups_in_order(&self, groups: &[BindGroup]) -> anyhow::Result<Vec<(u32, BindGroup)>> {
        let mut ordered = Vec::new();
        for (index, layout) in self.used_bind_group_layouts.iter().enumerate() {
            let Some(layout) = layout else { continue };
            let index = index as u32;
            if let Some((catchall_index, group)) = &self.catchall {
                if *catchall_index == index {
                    ordered.push((index, group.clone()));
                    continue;
                }
            }
            let group = groups
                .iter()
                .find(|g| g.layout().ptr_eq(layout))
                .ok_or_else(|| ResolveError::MissingBindGroup {
                    layout: layout.to_string(),
                    group: index,
                })?;
            ordered.push((index, group.clone()));
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{
        binding::{Buffer, LayoutEntry, Resource},
        data::DataSchema,
        item::Wgsl,
        resolve_items,
    };

    #[test]
    fn options_deserialize_with_defaults() {
        let options: ResolveOptions = serde_json::from_str(r#"{ "names": "strict" }"#).unwrap();
        assert_eq!(options.names, NamingPolicy::Strict);
        assert!(!options.validate);
        let options: ResolveOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ResolveOptions::default());
    }

    #[test]
    fn bind_groups_follow_group_order() {
        let layout = BindGroupLayout::new(
            Some("frame"),
            vec![(
                "time".into(),
                Some(LayoutEntry::Uniform {
                    schema: DataSchema::f32(),
                }),
            )],
        );
        let time = Buffer::new(Some("time"), DataSchema::f32());
        let extra = Buffer::new(Some("extra"), DataSchema::f32());
        let items: Vec<Wgsl> = vec![extra.uniform().into(), layout.bound("time").unwrap().into()];
        let module = resolve_items(&items, &ResolveOptions::default()).unwrap();

        let err = module.bind_groups_in_order(&[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::MissingBindGroup { group: 1, .. })
        ));

        let group = layout
            .create_bind_group(vec![("time".into(), Resource::Buffer(time))])
            .unwrap();
        let ordered = module.bind_groups_in_order(&[group]).unwrap();
        assert_eq!(ordered.iter().map(|(i, _)| *i).collect::<Vec<_>>(), [0, 1]);
        assert!(ordered[1].1.layout().ptr_eq(&layout));
    }
}
