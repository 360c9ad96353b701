use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

/// Secrets (`PHOTOBOX_API_KEY`, `PHOTOBOX_ADMIN_PASSWORD`) are never included.
pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "SHELL",
            "TERM",
            "RUST_LOG",
            "PHOTOBOX_PORT",
            "PHOTOBOX_UPLOAD_DIR",
            "PHOTOBOX_BASE_URL",
            "PHOTOBOX_MAX_FILE_SIZE",
            "PHOTOBOX_CREATE_THUMBNAILS",
            "PHOTOBOX_AUTO_DELETE_DAYS",
            "PHOTOBOX_MAGIC_BYTES",
            "PHOTOBOX_IMAGE_DECODING",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
