//! 演示站点：内存内容树、脚本执行体、过滤器与请求处理器的完整装配。
//!
//! # 教案式说明
//! - **What**：[`DemoSite`] 建立一棵小型内容树（首页、页眉、摘要与一个循环包含的节点），
//!   为 `/apps` 与 `/libs` 下的脚本登记闭包执行体，并挂上三个过滤器。
//! - **How**：`render_site` 二进制逐个渲染命令行给出的路径；也可以在测试中直接调用
//!   [`DemoSite::render`] 观察响应与诊断时间线。
//! - **契约**：站点内容固定，只有解析与调度设置可由调用方替换。

use std::sync::Arc;

use arbor_core::config::ArborSettings;
use arbor_core::error::Result;
use arbor_core::observability::ProgressTracker;
use arbor_core::path_info::{DispatchOptions, RequestPathInfo};
use arbor_core::request::{Method, Request, Response, attributes};
use arbor_core::resource::SyntheticResource;
use arbor_core::servlet::FnServlet;
use arbor_core::test_stubs::InMemoryResourceTree;
use arbor_pipeline::{
    FilterManager, FilterPredicate, FilterRegistration, FilterScope, FnFilter, RequestProcessor,
};
use arbor_resolver::{ServletRegistry, ServletResolver};

/// 装配好的演示站点。
pub struct DemoSite {
    tree: Arc<InMemoryResourceTree>,
    filters: Arc<FilterManager>,
    processor: Arc<RequestProcessor>,
}

impl DemoSite {
    pub fn new(settings: &ArborSettings) -> Result<Self> {
        let tree = InMemoryResourceTree::shared();
        let servlets = ServletRegistry::shared();
        populate_content(&tree);
        register_scripts(&tree, &servlets);

        let filters = FilterManager::shared();
        register_filters(&filters)?;

        let resolver = ServletResolver::new(
            tree.clone(),
            servlets,
            settings.resolver().clone(),
        );
        let processor = RequestProcessor::shared(
            Arc::clone(&filters),
            Arc::new(resolver),
            settings.engine().clone(),
        );
        Ok(Self {
            tree,
            filters,
            processor,
        })
    }

    pub fn filters(&self) -> &Arc<FilterManager> {
        &self.filters
    }

    pub fn processor(&self) -> &Arc<RequestProcessor> {
        &self.processor
    }

    /// 渲染一个请求路径，不存在的资源以占位节点进入解析。
    pub fn render(
        &self,
        method: Method,
        raw_path: &str,
        tracker: Option<Arc<dyn ProgressTracker>>,
    ) -> Result<Response> {
        let (resource, path_info) = RequestPathInfo::resolve(raw_path, self.tree.as_ref());
        let resource =
            resource.unwrap_or_else(|| SyntheticResource::new(path_info.resource_path()).into_ref());
        let mut request = Request::new(method, resource, path_info);
        if let Some(tracker) = tracker {
            request = request.with_tracker(tracker);
        }
        let mut response = Response::new();
        self.processor.process_request(&mut request, &mut response)?;
        Ok(response)
    }
}

fn populate_content(tree: &InMemoryResourceTree) {
    tree.add("/content/home", "demo/page", None);
    tree.add("/content/home/header", "demo/header", None);
    tree.add("/content/home/teaser", "demo/teaser", Some("demo/header"));
    tree.add("/content/loop", "demo/loop", None);
}

fn register_scripts(tree: &InMemoryResourceTree, servlets: &ServletRegistry) {
    let script = |path: &str, servlet| {
        tree.add_file(path);
        servlets.register(path, servlet);
    };

    script(
        "/apps/demo/page/html.esp",
        FnServlet::shared("/apps/demo/page/html.esp", |request: &mut Request, response: &mut Response| {
            response.set_header("Content-Type", "text/html");
            response.write("<html><body>");
            request.include(response, "header.html", &DispatchOptions::default())?;
            request.include(
                response,
                "teaser.html",
                &DispatchOptions::default().add_selectors("compact"),
            )?;
            response.write("</body></html>");
            Ok(())
        }),
    );
    script(
        "/apps/demo/page/json.esp",
        FnServlet::shared("/apps/demo/page/json.esp", |request: &mut Request, response: &mut Response| {
            response.set_header("Content-Type", "application/json");
            let path = request.resource().path().to_owned();
            response.write(&format!("{{\"path\":\"{path}\"}}"));
            Ok(())
        }),
    );
    script(
        "/libs/demo/header/html.esp",
        FnServlet::shared("/libs/demo/header/html.esp", |request: &mut Request, response: &mut Response| {
            let name = request.resource().name().to_owned();
            response.write(&format!("<header>{name}</header>"));
            Ok(())
        }),
    );
    script(
        "/apps/demo/teaser/compact.html.esp",
        FnServlet::shared("/apps/demo/teaser/compact.html.esp", |_request: &mut Request, response: &mut Response| {
            response.write("<aside>teaser</aside>");
            Ok(())
        }),
    );
    script(
        "/apps/demo/loop/html.esp",
        FnServlet::shared("/apps/demo/loop/html.esp", |request: &mut Request, response: &mut Response| {
            request.include(response, "/content/loop.html", &DispatchOptions::default())
        }),
    );
    script(
        "/apps/sling/servlet/errorhandler/404.esp",
        FnServlet::shared("/apps/sling/servlet/errorhandler/404.esp", |request: &mut Request, response: &mut Response| {
            let path = request
                .attribute(attributes::ERROR_REQUEST_PATH)
                .unwrap_or("?")
                .to_owned();
            response.set_header("Content-Type", "text/plain");
            response.write(&format!("nothing at {path}"));
            Ok(())
        }),
    );
}

fn register_filters(filters: &FilterManager) -> Result<()> {
    let request_log = FnFilter::shared(|request, response, chain| {
        tracing::info!(method = %request.method(), resource = %request.resource().path(), "request");
        chain.proceed(request, response)?;
        tracing::info!(status = response.status(), bytes = response.body().len(), "response");
        Ok(())
    });
    filters.register(
        &FilterRegistration::named("request-log")
            .with_scope(FilterScope::Request)
            .with_ranking(100),
        request_log,
    )?;

    let html_marker = FnFilter::shared(|request, response, chain| {
        let path = request.resource().path().to_owned();
        response.write(&format!("<!-- {path} -->"));
        chain.proceed(request, response)
    });
    filters.register(
        &FilterRegistration::named("html-marker")
            .with_scope(FilterScope::Component)
            .with_order(10)
            .with_predicate(FilterPredicate::new().with_extensions(["html"])),
        html_marker,
    )?;

    let error_header = FnFilter::shared(|request, response, chain| {
        if let Some(status) = request.attribute(attributes::ERROR_STATUS) {
            let status = status.to_owned();
            response.set_header("X-Arbor-Error", status);
        }
        chain.proceed(request, response)
    });
    filters.register(
        &FilterRegistration::named("error-header").with_scope(FilterScope::Error),
        error_header,
    )?;
    Ok(())
}
