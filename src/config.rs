use serde::Deserialize;

/// Process-wide settings read during dispatch.
///
/// Settings are read-only once a [`Handler`](crate::Handler) is built; the
/// handler attaches them to every request so behaviors never consult a
/// global.
///
/// # Examples
///
/// ```
/// use view_policy::Settings;
///
/// let settings: Settings = serde_json::from_str(r#"{"debug": true}"#).unwrap();
/// assert!(settings.debug);
/// assert_eq!(settings.login_url, "/accounts/login/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enables diagnostic 404 and 500 pages.
    pub debug: bool,
    /// Return uncaught errors to the caller instead of rendering a 500.
    pub propagate_exceptions: bool,
    /// Route name or path of the login page.
    pub login_url: String,
    /// Default query parameter carrying the post-login destination.
    pub redirect_field_name: String,
    /// Value applied by the clickjacking middleware.
    pub x_frame_options: String,
    /// Name of the CSRF cookie.
    pub csrf_cookie_name: String,
    /// Request header carrying the CSRF token.
    pub csrf_header_name: String,
    /// Form field carrying the CSRF token.
    pub csrf_form_field: String,
    /// Max age of the CSRF cookie, in seconds.
    pub csrf_cookie_age: u64,
    /// Default page cache timeout, in seconds.
    pub cache_timeout: u64,
    /// Prefix for page cache keys.
    pub cache_key_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            propagate_exceptions: false,
            login_url: "/accounts/login/".to_string(),
            redirect_field_name: crate::REDIRECT_FIELD_NAME.to_string(),
            x_frame_options: "SAMEORIGIN".to_string(),
            csrf_cookie_name: "csrftoken".to_string(),
            csrf_header_name: "X-CSRFToken".to_string(),
            csrf_form_field: "csrfmiddlewaretoken".to_string(),
            csrf_cookie_age: 60 * 60 * 24 * 7 * 52,
            cache_timeout: 600,
            cache_key_prefix: String::new(),
        }
    }
}
