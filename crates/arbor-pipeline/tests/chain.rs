//! 链执行器：渲染次数、谓词跳过、诊断记录与耗时记账。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor_core::error::Result;
use arbor_core::observability::RequestProgressTracker;
use arbor_core::path_info::RequestPathInfo;
use arbor_core::request::{Method, Request, Response};
use arbor_core::resource::SyntheticResource;
use arbor_pipeline::{
    Filter, FilterChain, FilterChainExecutor, FilterEntry, FilterPredicate, FilterSnapshot,
    FnFilter,
};
use proptest::prelude::*;

fn request(raw: &str) -> Request {
    let info = RequestPathInfo::parse(raw);
    let resource = SyntheticResource::new(info.resource_path()).into_ref();
    Request::new(Method::Get, resource, info)
}

/// 记录调用次数并放行。
fn counting(calls: Arc<AtomicUsize>) -> Arc<dyn Filter> {
    FnFilter::shared(move |request, response, chain| {
        calls.fetch_add(1, Ordering::SeqCst);
        chain.proceed(request, response)
    })
}

fn snapshot(entries: Vec<FilterEntry>) -> FilterSnapshot {
    Arc::new(entries)
}

fn run(snapshot: FilterSnapshot, request: &mut Request) -> (usize, Response) {
    let mut renders = 0;
    let mut response = Response::new();
    {
        let mut executor = FilterChainExecutor::new(snapshot, |_: &mut Request, response: &mut Response| -> Result<()> {
            renders += 1;
            response.write("body");
            Ok(())
        });
        executor.proceed(request, &mut response).expect("链执行成功");
    }
    (renders, response)
}

#[test]
fn every_passthrough_chain_renders_exactly_once() {
    for len in [0usize, 1, 5] {
        let calls = Arc::new(AtomicUsize::new(0));
        let entries = (0..len)
            .map(|id| FilterEntry::new(counting(Arc::clone(&calls)), id as u64, 0, "test"))
            .collect();
        let (renders, response) = run(snapshot(entries), &mut request("/content/page.html"));
        assert_eq!(calls.load(Ordering::SeqCst), len, "{len} 个过滤器各调用一次");
        assert_eq!(renders, 1, "{len} 个过滤器时渲染一次");
        assert_eq!(response.body(), "body");
    }
}

#[test]
fn predicate_skips_filters_without_breaking_the_chain() {
    let json_calls = Arc::new(AtomicUsize::new(0));
    let all_calls = Arc::new(AtomicUsize::new(0));
    let entries = vec![
        FilterEntry::new(counting(Arc::clone(&json_calls)), 1, 0, "test")
            .with_predicate(Some(FilterPredicate::new().with_extensions(["json"]))),
        FilterEntry::new(counting(Arc::clone(&all_calls)), 2, 0, "test"),
    ];
    let (renders, _) = run(snapshot(entries), &mut request("/content/page.html"));
    assert_eq!(json_calls.load(Ordering::SeqCst), 0, "扩展名不匹配时被跳过");
    assert_eq!(all_calls.load(Ordering::SeqCst), 1);
    assert_eq!(renders, 1);
}

#[test]
fn filters_see_and_can_modify_the_response() {
    let header = FnFilter::shared(|request, response, chain| {
        response.set_header("X-Filtered", "yes");
        chain.proceed(request, response)?;
        response.write(" footer");
        Ok(())
    });
    let (_, response) = run(
        snapshot(vec![FilterEntry::new(header, 1, 0, "test")]),
        &mut request("/content/page.html"),
    );
    assert_eq!(response.header("X-Filtered"), Some("yes"));
    assert_eq!(response.body(), "body footer");
}

#[test]
fn tracker_records_calls_and_timings() {
    let tracker = Arc::new(RequestProgressTracker::new());
    let mut request = request("/content/page.html").with_tracker(tracker.clone());
    let entries = vec![
        FilterEntry::new(counting(Arc::new(AtomicUsize::new(0))), 1, 0, "test").with_name("first"),
        FilterEntry::new(counting(Arc::new(AtomicUsize::new(0))), 2, 0, "test").with_name("second"),
    ];
    run(snapshot(entries), &mut request);

    let messages = tracker.messages();
    let calling: Vec<&String> = messages.iter().filter(|m| m.starts_with("Calling filter: ")).collect();
    assert_eq!(calling.len(), 2);
    assert!(calling[0].ends_with("first"));
    assert!(calling[1].ends_with("second"));
    assert_eq!(
        messages.iter().filter(|m| m.starts_with("Filter timing: filter=")).count(),
        2,
        "每个被调用的过滤器一条耗时记录"
    );
}

#[test]
fn stats_accumulate_across_dispatches() {
    let entry = FilterEntry::new(counting(Arc::new(AtomicUsize::new(0))), 1, 0, "test");
    let chain = snapshot(vec![entry.clone()]);
    for _ in 0..3 {
        run(Arc::clone(&chain), &mut request("/content/page.html"));
    }
    assert_eq!(entry.stats().calls(), 3, "克隆的条目共享统计");
}

proptest! {
    #[test]
    fn outer_time_covers_inner_time(
        selected in proptest::collection::vec(any::<bool>(), 0..8),
        spin in 0u32..200,
    ) {
        let entries: Vec<FilterEntry> = selected
            .iter()
            .enumerate()
            .map(|(id, &accept)| {
                let filter = FnFilter::shared(move |request, response, chain| {
                    let mut acc = 0u64;
                    for i in 0..spin {
                        acc = acc.wrapping_add(u64::from(i));
                    }
                    std::hint::black_box(acc);
                    chain.proceed(request, response)
                });
                let predicate = if accept {
                    FilterPredicate::new()
                } else {
                    FilterPredicate::new().with_methods(["DELETE"])
                };
                FilterEntry::new(filter, id as u64, 0, "test").with_predicate(Some(predicate))
            })
            .collect();

        let mut response = Response::new();
        let mut renders = 0;
        let mut executor = FilterChainExecutor::new(snapshot(entries), |_: &mut Request, _: &mut Response| -> Result<()> {
            renders += 1;
            Ok(())
        });
        executor.proceed(&mut request("/content/page.html"), &mut response).expect("链执行成功");

        let timings = executor.timings().expect("最外层返回后已汇总").clone();
        prop_assert_eq!(timings.filters().len(), selected.len());
        for (timing, &accept) in timings.filters().iter().zip(&selected) {
            prop_assert_eq!(timing.invoked, accept);
            prop_assert!(timing.outer >= timing.inner, "outer 不小于 inner: {:?}", timing);
            prop_assert_eq!(timing.self_time, timing.outer - timing.inner);
        }
        drop(executor);
        prop_assert_eq!(renders, 1);
    }
}
