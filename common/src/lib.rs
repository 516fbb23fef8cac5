pub mod shutdown;

/// Disables terminal colors when `DISABLE_COLORS` is set, matching the rest of the
/// process's console output conventions.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}
