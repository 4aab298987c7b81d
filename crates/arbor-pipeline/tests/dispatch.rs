//! 端到端调度：顶层请求、include/forward、调度上限与错误处理。

use std::sync::{Arc, Mutex};

use arbor_core::config::{EngineSettings, ResolverSettings};
use arbor_core::error::{CoreError, Result, codes};
use arbor_core::observability::RequestProgressTracker;
use arbor_core::path_info::{DispatchOptions, RequestPathInfo};
use arbor_core::request::{Method, Request, Response, attributes};
use arbor_core::resource::SyntheticResource;
use arbor_core::servlet::{FnServlet, ServletRef};
use arbor_core::test_stubs::InMemoryResourceTree;
use arbor_pipeline::{FilterManager, FilterRegistration, FilterScope, FnFilter, RequestProcessor};
use arbor_resolver::{DefaultErrorServlet, ServletRegistry, ServletResolver};
use tracing_test::traced_test;

struct Site {
    tree: Arc<InMemoryResourceTree>,
    servlets: Arc<ServletRegistry>,
    filters: Arc<FilterManager>,
}

impl Site {
    fn new() -> Self {
        Self {
            tree: InMemoryResourceTree::shared(),
            servlets: ServletRegistry::shared(),
            filters: FilterManager::shared(),
        }
    }

    fn script<F>(&self, path: &str, handler: F) -> ServletRef
    where
        F: Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync + 'static,
    {
        self.tree.add_file(path);
        let servlet = FnServlet::shared(path, handler);
        self.servlets.register(path, Arc::clone(&servlet));
        servlet
    }

    fn text(&self, path: &str, text: &'static str) -> ServletRef {
        self.script(path, move |_request, response| {
            response.write(text);
            Ok(())
        })
    }

    fn processor(&self, engine: EngineSettings) -> Arc<RequestProcessor> {
        let resolver = ServletResolver::new(
            self.tree.clone(),
            self.servlets.clone(),
            ResolverSettings::default(),
        );
        RequestProcessor::shared(Arc::clone(&self.filters), Arc::new(resolver), engine)
    }

    fn request(&self, raw: &str) -> Request {
        let (resource, info) = RequestPathInfo::resolve(raw, self.tree.as_ref());
        let resource =
            resource.unwrap_or_else(|| SyntheticResource::new(info.resource_path()).into_ref());
        Request::new(Method::Get, resource, info)
    }

    /// 记录经过顺序的过滤器。
    fn trace_filter(&self, scope: FilterScope, label: &'static str, log: &Arc<Mutex<Vec<String>>>) {
        let log = Arc::clone(log);
        let filter = FnFilter::shared(move |request, response, chain| {
            log.lock()
                .expect("测试锁未中毒")
                .push(format!("{label}:{}", request.resource().path()));
            chain.proceed(request, response)
        });
        self.filters
            .register(&FilterRegistration::named(label).with_scope(scope), filter)
            .expect("登记成功");
    }
}

fn options() -> DispatchOptions {
    DispatchOptions::default()
}

#[test]
fn top_level_request_renders_the_component_script() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.text("/apps/app/page/html.esp", "page");

    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/page.html");
    let mut response = Response::new();
    processor.process_request(&mut request, &mut response).expect("处理成功");

    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), "page");
    assert_eq!(request.servlet_calls(), 1);
    assert_eq!(request.attribute(attributes::CURRENT_SERVLET_NAME), None, "调用结束后恢复");
}

#[test]
fn include_renders_child_and_restores_the_outer_frame() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.tree.add("/content/page/par", "app/par", None);
    site.script("/apps/app/page/html.esp", |request, response| {
        response.write("<");
        request.include(response, "par.html", &DispatchOptions::default())?;
        response.write(">");
        response.write(request.resource().path());
        Ok(())
    });
    site.script("/apps/app/par/html.esp", |request, response| {
        response.write(request.resource().path());
        response.write(&request.inclusion_depth().to_string());
        Ok(())
    });

    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/page.html");
    let mut response = Response::new();
    processor.process_request(&mut request, &mut response).expect("处理成功");

    assert_eq!(response.body(), "</content/page/par1>/content/page");
    assert_eq!(request.inclusion_depth(), 0);
    assert_eq!(request.servlet_calls(), 2);
}

#[test]
fn filters_run_per_scope() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.tree.add("/content/page/par", "app/par", None);
    site.script("/apps/app/page/html.esp", |request, response| {
        request.include(response, "/content/page/par.html", &DispatchOptions::default())
    });
    site.text("/apps/app/par/html.esp", "par");

    let log = Arc::new(Mutex::new(Vec::new()));
    site.trace_filter(FilterScope::Request, "request", &log);
    site.trace_filter(FilterScope::Component, "component", &log);
    site.trace_filter(FilterScope::Forward, "forward", &log);

    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/page.html");
    processor
        .process_request(&mut request, &mut Response::new())
        .expect("处理成功");

    let log = log.lock().expect("测试锁未中毒").clone();
    assert_eq!(
        log,
        vec![
            "request:/content/page",
            "component:/content/page",
            "component:/content/page/par",
        ]
    );
}

#[test]
fn forward_discards_buffered_output() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.tree.add("/content/other", "app/other", None);
    site.script("/apps/app/page/html.esp", |request, response| {
        response.write("discarded");
        request.forward(response, "/content/other.html", &DispatchOptions::default())
    });
    site.text("/apps/app/other/html.esp", "other");

    let processor = site.processor(EngineSettings::default());
    let mut response = Response::new();
    processor
        .process_request(&mut site.request("/content/page.html"), &mut response)
        .expect("处理成功");
    assert_eq!(response.body(), "other");
}

#[test]
fn dispatch_options_reach_resolution() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.tree.add("/content/page/teaser", "app/teaser", None);
    site.script("/apps/app/page/html.esp", |request, response| {
        request.include(response, "teaser.html", &options().replace_selectors("compact"))?;
        response.write("|");
        request.include(response, "missing.html", &options().force_resource_type("app/teaser"))
    });
    site.text("/apps/app/teaser/compact.html.esp", "compact");
    site.text("/apps/app/teaser/html.esp", "full");

    let processor = site.processor(EngineSettings::default());
    let mut response = Response::new();
    processor
        .process_request(&mut site.request("/content/page.html"), &mut response)
        .expect("处理成功");
    assert_eq!(response.body(), "compact|full", "缺失资源以强制类型渲染");
}

#[test]
fn relative_path_escaping_the_root_is_rejected() {
    let site = Site::new();
    site.tree.add("/content", "app/page", None);
    site.script("/apps/app/page/html.esp", |request, response| {
        let err = request
            .include(response, "../../etc.html", &DispatchOptions::default())
            .expect_err("越过根节点");
        response.write(err.code());
        Ok(())
    });

    let processor = site.processor(EngineSettings::default());
    let mut response = Response::new();
    processor
        .process_request(&mut site.request("/content.html"), &mut response)
        .expect("处理成功");
    assert_eq!(response.body(), codes::RESOLVER_NOT_FOUND);
}

#[traced_test]
#[test]
fn self_inclusion_hits_the_depth_limit() {
    let site = Site::new();
    site.tree.add("/content/loop", "app/loop", None);
    site.script("/apps/app/loop/html.esp", |request, response| {
        request.include(response, "/content/loop.html", &DispatchOptions::default())
    });
    site.text(
        "/apps/sling/servlet/errorhandler/dispatch.recursion_too_deep.esp",
        "too deep",
    );

    let processor = site.processor(EngineSettings::new(3, 1000));
    let mut request = site.request("/content/loop.html");
    let mut response = Response::new();
    processor.process_request(&mut request, &mut response).expect("错误已处理");

    assert_eq!(response.status(), 500);
    assert_eq!(response.body(), "too deep");
    assert_eq!(
        request.attribute(attributes::ERROR_CODE),
        Some(codes::DISPATCH_RECURSION_TOO_DEEP)
    );
    assert_eq!(request.attribute(attributes::ERROR_REQUEST_PATH), Some("/content/loop"));
    assert_eq!(request.inclusion_depth(), 0, "内容帧全部弹出");
    assert!(logs_contain("dispatch rejected"));
}

#[test]
fn servlet_call_budget_is_enforced_but_errors_still_render() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.tree.add("/content/page/par", "app/par", None);
    site.script("/apps/app/page/html.esp", |request, response| {
        for _ in 0..5 {
            request.include(response, "par.html", &DispatchOptions::default())?;
        }
        Ok(())
    });
    site.text("/apps/app/par/html.esp", "par");

    let processor = site.processor(EngineSettings::new(50, 3));
    let mut request = site.request("/content/page.html");
    let mut response = Response::new();
    processor.process_request(&mut request, &mut response).expect("错误已处理");

    assert_eq!(request.servlet_calls(), 3);
    assert_eq!(response.status(), 500);
    assert_eq!(
        request.attribute(attributes::ERROR_CODE),
        Some(codes::DISPATCH_TOO_MANY_CALLS)
    );
    assert!(
        response.body().starts_with("500 "),
        "兜底错误处理器输出状态码: {}",
        response.body()
    );
}

#[test]
fn missing_servlet_is_a_404() {
    let site = Site::new();
    site.script("/apps/sling/servlet/errorhandler/404.esp", |request, response| {
        let path = request
            .attribute(attributes::ERROR_REQUEST_PATH)
            .unwrap_or_default()
            .to_owned();
        response.write(&format!("not found: {path}"));
        Ok(())
    });

    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/nothing.html");
    let mut response = Response::new();
    processor.process_request(&mut request, &mut response).expect("错误已处理");

    assert_eq!(response.status(), 404);
    assert_eq!(response.body(), "not found: /content/nothing");
    assert_eq!(request.attribute(attributes::ERROR_STATUS), Some("404"));
}

#[test]
fn send_error_goes_through_the_error_chain() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.script("/apps/app/page/html.esp", |_request, response| {
        response.write("partial");
        response.send_error(403, "nope");
        Ok(())
    });
    let log = Arc::new(Mutex::new(Vec::new()));
    site.trace_filter(FilterScope::Error, "error", &log);

    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/page.html");
    let mut response = Response::new();
    processor.process_request(&mut request, &mut response).expect("错误已处理");

    assert_eq!(response.status(), 403);
    assert_eq!(response.body(), "403 nope", "缓冲区被清空后由兜底处理器输出");
    assert_eq!(
        request.attribute(attributes::ERROR_SERVLET_NAME),
        Some("/apps/app/page/html.esp")
    );
    assert_eq!(log.lock().expect("测试锁未中毒").len(), 1, "ERROR 链执行一次");
}

#[test]
fn error_chain_is_skipped_for_successful_requests() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.text("/apps/app/page/html.esp", "page");
    let log = Arc::new(Mutex::new(Vec::new()));
    site.trace_filter(FilterScope::Error, "error", &log);

    let processor = site.processor(EngineSettings::default());
    processor
        .process_request(&mut site.request("/content/page.html"), &mut Response::new())
        .expect("处理成功");
    assert!(log.lock().expect("测试锁未中毒").is_empty());
}

#[test]
fn failing_error_handler_is_reported_to_the_caller() {
    let site = Site::new();
    site.script("/apps/sling/servlet/errorhandler/404.esp", |_request, _response| {
        Err(CoreError::new(codes::FILTER_EXECUTION_FAILED, "handler broke"))
    });

    let processor = site.processor(EngineSettings::default());
    let mut response = Response::new();
    let err = processor
        .process_request(&mut site.request("/content/nothing.html"), &mut response)
        .expect_err("错误处理器失败时返回错误");
    assert_eq!(err.code(), codes::FILTER_EXECUTION_FAILED);
    assert_eq!(response.status(), 404);
}

#[traced_test]
#[test]
fn error_handling_does_not_reenter() {
    let site = Site::new();
    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/page.html");
    let mut response = Response::new();

    processor
        .handle_error_status(410, "gone", &mut request, &mut response)
        .expect("首次处理");
    assert_eq!(response.body(), "410 gone");

    processor
        .handle_error_status(500, "again", &mut request, &mut response)
        .expect("重入被忽略");
    assert_eq!(response.body(), "410 gone", "第二次不再调用处理器");
    assert_eq!(response.status(), 500);
    assert!(logs_contain("recursive error handling detected"));
}

#[test]
fn progress_tracker_sees_the_whole_request() {
    let site = Site::new();
    site.tree.add("/content/page", "app/page", None);
    site.text("/apps/app/page/html.esp", "page");
    let tracker = Arc::new(RequestProgressTracker::new());

    let processor = site.processor(EngineSettings::default());
    let mut request = site.request("/content/page.html").with_tracker(tracker.clone());
    processor
        .process_request(&mut request, &mut Response::new())
        .expect("处理成功");

    let messages = tracker.messages();
    assert!(messages[0].starts_with("Method=GET, ResourcePath=/content/page"));
    assert!(
        messages
            .iter()
            .any(|m| m == "TIMER_START{/apps/app/page/html.esp#1}"),
        "Servlet 调用被计时: {messages:?}"
    );
}

#[test]
fn error_handling_is_timed_on_the_progress_tracker() {
    let site = Site::new();
    site.text("/apps/sling/servlet/errorhandler/404.esp", "missing");
    site.tree.add("/content/broken", "app/broken", None);
    site.script("/apps/app/broken/html.esp", |_request, _response| {
        Err(CoreError::new(codes::FILTER_EXECUTION_FAILED, "boom"))
    });
    let processor = site.processor(EngineSettings::default());

    let tracker = Arc::new(RequestProgressTracker::new());
    let mut request = site.request("/content/nothing.html").with_tracker(tracker.clone());
    processor
        .process_request(&mut request, &mut Response::new())
        .expect("错误已处理");
    let messages = tracker.messages();
    let start = messages
        .iter()
        .position(|m| m == "TIMER_START{handleError:status=404}")
        .expect("状态码错误处理被计时");
    assert_eq!(
        messages.get(start + 1).map(String::as_str),
        Some("Using handler /apps/sling/servlet/errorhandler/404.esp")
    );
    assert!(
        messages.last().is_some_and(|m| m.starts_with("TIMER_END{")
            && m.ends_with("handleError:status=404} Error handler finished")),
        "错误处理结束记录: {messages:?}"
    );

    let tracker = Arc::new(RequestProgressTracker::new());
    let mut request = site.request("/content/broken.html").with_tracker(tracker.clone());
    processor
        .process_request(&mut request, &mut Response::new())
        .expect("错误已处理");
    let expected = format!("TIMER_START{{handleError:error={}}}", codes::FILTER_EXECUTION_FAILED);
    assert!(
        tracker.messages().contains(&expected),
        "错误码驱动的处理被计时: {:?}",
        tracker.messages()
    );
}

#[test]
fn default_error_servlet_is_the_final_fallback() {
    let site = Site::new();
    let resolver = ServletResolver::new(
        site.tree.clone(),
        site.servlets.clone(),
        ResolverSettings::default(),
    );
    let processor = RequestProcessor::shared(
        Arc::clone(&site.filters),
        Arc::new(resolver.with_fallback_error_servlet(Arc::new(DefaultErrorServlet))),
        EngineSettings::default(),
    );
    let mut response = Response::new();
    processor
        .process_request(&mut site.request("/content/nothing.html"), &mut response)
        .expect("错误已处理");
    assert_eq!(response.status(), 404);
    assert!(response.body().starts_with("404 "));
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
}
