//! Static configuration: known apps, prompts and console messages.

mod apps;
mod i18n;
mod prompts;

pub use apps::{
    get_app_name, get_package, parse_launchable, AppEntry, AppResolver, PackageCatalog, KNOWN_APPS,
};
pub use i18n::{get_messages, Messages};
pub use prompts::{get_system_prompt, SYSTEM_PROMPT_EN, SYSTEM_PROMPT_ZH};
