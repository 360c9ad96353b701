pub mod bugreport;
pub mod client;
pub mod server;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the upload server";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment for bug reports";

pub const UPLOAD_SUBCOMMAND: &str = "upload";
pub const UPLOAD_DESCRIPTION: &str = "Upload a photo to a photobox server";

pub const GALLERY_SUBCOMMAND: &str = "gallery";
pub const GALLERY_DESCRIPTION: &str = "List uploaded photos, newest first";

pub const DELETE_SUBCOMMAND: &str = "delete";
pub const DELETE_DESCRIPTION: &str = "Delete one photo (admin)";

pub const CLEAR_SUBCOMMAND: &str = "clear";
pub const CLEAR_DESCRIPTION: &str = "Delete all photos (admin)";
