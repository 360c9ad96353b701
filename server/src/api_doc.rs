//! OpenAPI document served at `/api-docs/openapi.json`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Photobox",
        description = "Photo booth upload server: authenticated photo uploads, thumbnails and a paged gallery."
    ),
    paths(
        handlers::upload,
        handlers::gallery,
        handlers::delete_photo,
        handlers::clear_gallery,
        handlers::download,
    ),
    components(
        schemas(
            kernel::UploadRecord,
            kernel::UploadData,
            kernel::UploadReply,
            kernel::ErrorReply,
            kernel::GalleryPage,
            kernel::DeleteResult,
            kernel::ClearResult,
        ),
        responses(crate::file_reply::PhotoReply)
    ),
    modifiers(&SecuritySchemes),
    tags(
        (name = "upload", description = "Photo uploads from booth clients"),
        (name = "gallery", description = "Browsing and administration of uploaded photos")
    )
)]
pub struct ApiDoc;

struct SecuritySchemes;

impl Modify for SecuritySchemes {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
            components.add_security_scheme(
                "admin_password",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    handlers::ADMIN_PASSWORD_HEADER,
                ))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        // Act
        let doc = ApiDoc::openapi();

        // Assert
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec![
                "/api/gallery",
                "/api/gallery/{id}",
                "/api/gallery/{id}/download",
                "/upload"
            ]
        );
        let schemes = doc.components.unwrap().security_schemes;
        assert!(schemes.contains_key("bearer"));
        assert!(schemes.contains_key("admin_password"));
    }
}
