mod copy;
mod fs_utils;
mod layout;
mod transactions;

pub use copy::{CopyOutcome, FileCopier};
pub use fs_utils::remove_file_if_exists;
pub use layout::{InstallDirectory, APP_FOLDER, CONTENT_FOLDER, PLATFORM_FOLDER};
pub use transactions::{StageError, TransactionError, TransactionManager};
