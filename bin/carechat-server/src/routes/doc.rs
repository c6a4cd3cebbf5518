use utoipa::OpenApi;

use crate::routes::{chat, health};

#[derive(OpenApi)]
#[openapi(info(
    title = "carechat-server",
    description = "Authenticated health-chat API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn document_lists_chat_and_health() {
        let doc = get_docs();
        assert!(doc.paths.paths.contains_key("/chat"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
