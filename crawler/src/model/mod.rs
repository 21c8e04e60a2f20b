pub mod files;
pub mod package;
pub mod repository;

pub use files::RepoFiles;
pub use package::Package;
pub use repository::Repository;
