// 请求追踪中间件
// 为每个请求分配请求 ID，并按状态码分级记录处理结果

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
    time::Instant,
};
use tracing::{error, info, warn};
use uuid::Uuid;

/// 请求 ID 请求头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 请求 ID（存放在请求扩展中）
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// 请求追踪中间件
pub struct RequestTracingMiddleware;

impl<S, B> Transform<S, ServiceRequest> for RequestTracingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestTracingMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestTracingMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestTracingMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestTracingMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            // 沿用调用方的请求 ID，没有则生成
            let request_id = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            req.extensions_mut().insert(RequestId(request_id.clone()));

            let method = req.method().clone();
            let path = req.path().to_string();
            let start_time = Instant::now();

            let result = service.call(req).await;
            let duration_ms = start_time.elapsed().as_millis();

            match result {
                Ok(mut response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        error!(request_id = %request_id, method = %method, path = %path,
                            status = status.as_u16(), duration_ms = %duration_ms, "服务器错误");
                    } else if status.is_client_error() {
                        warn!(request_id = %request_id, method = %method, path = %path,
                            status = status.as_u16(), duration_ms = %duration_ms, "客户端错误");
                    } else {
                        info!(request_id = %request_id, method = %method, path = %path,
                            status = status.as_u16(), duration_ms = %duration_ms, "请求处理成功");
                    }

                    if let Ok(value) = HeaderValue::from_str(&request_id) {
                        response
                            .headers_mut()
                            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                    }
                    Ok(response)
                }
                Err(err) => {
                    error!(request_id = %request_id, method = %method, path = %path,
                        error = %err, duration_ms = %duration_ms, "请求处理失败");
                    Err(err)
                }
            }
        })
    }
}
