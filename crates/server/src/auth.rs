//! Authentication middleware. Open question (spec §6 leaves operator/analyst
//! authentication to the deployment): this broker trusts its network
//! perimeter and performs no authentication of its own — a reverse proxy or
//! service mesh in front of it is expected to authenticate callers before
//! traffic reaches `/ws` or the control-plane routes. The middleware exists
//! as the seam the teacher's stack always wires in, so a deployment that
//! does need it has somewhere to put it.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

pub async fn auth_middleware(request: Request, next: Next) -> Response {
    next.run(request).await
}
