#![no_main]

use arbitrary::Arbitrary;
use arbor_core::path_info::{DispatchOptions, RequestPathInfo, ResourcePathIterator};
use arbor_core::test_stubs::InMemoryResourceTree;
use libfuzzer_sys::fuzz_target;

/// 一次路径分解用例。
///
/// - **What**：任意请求路径、若干预置节点与调度选项。
/// - **How**：分别走纯解析、探测序列与借助内存树的解析，再叠加调度选项，
///   检查各部分之间的结构关系始终成立。
#[derive(Debug, Arbitrary)]
struct PathCase {
    raw: String,
    nodes: Vec<String>,
    replace_selectors: Option<String>,
    add_selectors: Option<String>,
    replace_suffix: Option<String>,
}

fuzz_target!(|case: PathCase| {
    let parsed = RequestPathInfo::parse(&case.raw);
    assert!(case.raw.starts_with(parsed.resource_path()));
    check_parts(&parsed);

    let mut previous: Option<&str> = None;
    let mut steps = 0usize;
    for candidate in ResourcePathIterator::new(&case.raw) {
        if let Some(longer) = previous {
            assert!(candidate.len() < longer.len() && longer.starts_with(candidate));
        }
        previous = Some(candidate);
        steps += 1;
        assert!(steps <= case.raw.len() + 1, "探测序列必须收敛");
    }

    let tree = InMemoryResourceTree::new();
    for node in case.nodes.iter().take(8) {
        if node.starts_with('/') && !node.contains("..") {
            tree.add_file(node);
        }
    }
    let (resource, resolved) = RequestPathInfo::resolve(&case.raw, &tree);
    if let Some(resource) = &resource {
        assert_eq!(resource.path(), resolved.resource_path());
    }
    check_parts(&resolved);

    let options = DispatchOptions {
        replace_selectors: case.replace_selectors,
        add_selectors: case.add_selectors,
        replace_suffix: case.replace_suffix,
        force_resource_type: None,
    };
    let merged = resolved.merge(&options);
    assert_eq!(merged.resource_path(), resolved.resource_path());
    assert_eq!(merged.extension(), resolved.extension());
    check_parts(&merged);
});

fn check_parts(info: &RequestPathInfo) {
    for selector in info.selectors() {
        assert!(!selector.is_empty() && !selector.contains('.'));
    }
    match info.selector_string() {
        Some(joined) => assert_eq!(joined, info.selectors().join(".")),
        None => assert!(info.selectors().is_empty()),
    }
    if let Some(extension) = info.extension() {
        assert!(!extension.is_empty() && !extension.contains('/'));
    }
}
