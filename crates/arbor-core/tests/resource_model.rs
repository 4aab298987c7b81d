//! 资源模型与仓库访问契约的行为测试。

use std::sync::Arc;

use arbor_core::resource::{ResourceAccessor, SyntheticResource, resource_or_synthetic};
use arbor_core::test_stubs::InMemoryResourceTree;

#[test]
fn parent_type_follows_search_path_order() {
    let tree = InMemoryResourceTree::new();
    tree.add("/apps/foo/bar", "nt:folder", Some("foo/from-apps"));
    tree.add("/libs/foo/bar", "nt:folder", Some("foo/from-libs"));

    assert_eq!(
        tree.parent_resource_type("foo/bar").as_deref(),
        Some("foo/from-apps"),
        "/apps 在搜索路径中优先"
    );
    assert_eq!(
        tree.parent_resource_type("foo:bar").as_deref(),
        Some("foo/from-apps"),
        "冒号写法等价于斜杠"
    );
}

#[test]
fn parent_type_of_absolute_type_is_direct() {
    let tree = InMemoryResourceTree::new();
    tree.add("/types/base", "nt:folder", Some("abs/parent"));
    assert_eq!(tree.parent_resource_type("/types/base").as_deref(), Some("abs/parent"));
    assert_eq!(tree.parent_resource_type("/types/none"), None);
}

#[test]
fn first_hit_wins_even_without_super_type() {
    let tree = InMemoryResourceTree::new();
    tree.add("/apps/foo/bar", "nt:folder", None);
    tree.add("/libs/foo/bar", "nt:folder", Some("ignored"));
    assert_eq!(tree.parent_resource_type("foo/bar"), None);
}

#[test]
fn synthetic_placeholder_still_lists_children() {
    let tree = Arc::new(InMemoryResourceTree::new());
    tree.add_file("/apps/other/html.esp");

    let placeholder = resource_or_synthetic(tree.as_ref(), "/apps/other");
    assert!(!placeholder.is_synthetic(), "存在的节点不应被替换");

    let missing = resource_or_synthetic(tree.as_ref(), "relative/missing");
    assert!(missing.is_synthetic());
    assert_eq!(missing.path(), "/relative/missing", "占位节点补齐绝对路径");
    assert_eq!(tree.list_children(missing.as_ref()).count(), 0);

    let synthetic = SyntheticResource::new("/apps/other");
    let names: Vec<String> = tree
        .list_children(&synthetic)
        .map(|child| child.name().to_owned())
        .collect();
    assert_eq!(names, vec!["html.esp"], "占位节点同样可以枚举子节点");
}
