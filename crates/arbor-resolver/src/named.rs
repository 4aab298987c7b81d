use arbor_core::config::ResolverSettings;
use arbor_core::resource::{Resource, ResourceAccessor, ResourceRef, path, resource_or_synthetic};

use crate::collector::{CollectorBase, ScriptCollector, script_name};
use crate::weight::{MatchWeight, WeightedResourceSet};

/// 按脚本名收集候选，例如 `footer.html` 或 `parts/footer`。
///
/// 名称在第一个 `.` 处拆成脚本名与扩展名。给定资源时沿其类型链查找；
/// 未给定资源时类型、父类型与基础类型均为空串，只在搜索路径根目录下查找。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamedScriptResourceCollector {
    base: CollectorBase,
    script_name: String,
}

impl NamedScriptResourceCollector {
    pub fn new(name: &str, resource: Option<&dyn Resource>, settings: &ResolverSettings) -> Self {
        let (script, extension) = match name.find('.') {
            Some(dot) => (&name[..dot], Some(&name[dot + 1..])),
            None => (name, None),
        };
        let base = match resource {
            Some(resource) => CollectorBase::new(
                settings.base_resource_type(),
                resource.resource_type(),
                resource.resource_super_type(),
                extension,
                settings.execution_paths(),
            ),
            None => CollectorBase::new("", "", None, extension, settings.execution_paths()),
        };
        Self {
            base,
            script_name: script.to_owned(),
        }
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }
}

impl ScriptCollector for NamedScriptResourceCollector {
    fn base(&self) -> &CollectorBase {
        &self.base
    }

    fn collect_at(
        &self,
        accessor: &dyn ResourceAccessor,
        location: &ResourceRef,
        found: &mut WeightedResourceSet,
    ) {
        if let Some(extension) = self.base.extension() {
            let exact = format!(
                "{}/{}.{}",
                location.path().trim_end_matches('/'),
                self.script_name,
                extension
            );
            if self.base.is_path_allowed(&exact) {
                if let Some(resource) = accessor.get_resource(&exact) {
                    found.insert(resource, 0, MatchWeight::Extension);
                }
            }
        }

        let (directory, name) = match self.script_name.rfind('/') {
            Some(slash) => {
                let dir = path::join(location.path(), &self.script_name[..slash]);
                (resource_or_synthetic(accessor, &dir), &self.script_name[slash + 1..])
            }
            None => (location.clone(), self.script_name.as_str()),
        };

        for child in accessor.list_children(directory.as_ref()) {
            if !self.base.is_path_allowed(child.path()) {
                continue;
            }
            if script_name(child.name()) == Some(name) {
                found.insert(child, 0, MatchWeight::Prefix);
            }
        }
    }
}
