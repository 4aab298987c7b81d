use arbor_core::error::Result;
use arbor_core::request::{Request, Response, attributes};
use arbor_core::servlet::Servlet;

/// 没有任何错误处理脚本时的兜底处理器：输出状态码与说明文本。
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultErrorServlet;

impl DefaultErrorServlet {
    pub const NAME: &'static str = "arbor default error handler";
}

impl Servlet for DefaultErrorServlet {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn service(&self, request: &mut Request, response: &mut Response) -> Result<()> {
        let status = request
            .attribute(attributes::ERROR_STATUS)
            .and_then(|raw| raw.parse::<u16>().ok())
            .unwrap_or(500);
        let message = request
            .attribute(attributes::ERROR_MESSAGE)
            .unwrap_or("unexpected error")
            .to_owned();
        response.set_status(status);
        response.set_header("Content-Type", "text/plain");
        response.write(&format!("{status} {message}"));
        Ok(())
    }
}
