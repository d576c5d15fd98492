//! HTML templates for the web interface.
//!
//! Templates are embedded at compile time using `include_str!` and filled by
//! replacing `{{placeholder}}` markers. Values are escaped by the caller.

use crate::auth::Caller;

/// Page shell with navigation and flash message slot.
pub const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

/// Landing page for guests.
pub const WELCOME_TEMPLATE: &str = include_str!("templates/welcome.html");

pub const LOGIN_TEMPLATE: &str = include_str!("templates/login.html");

pub const REGISTER_TEMPLATE: &str = include_str!("templates/register.html");

/// Task list with stats panel, filters and pagination.
pub const TASKS_TEMPLATE: &str = include_str!("templates/tasks.html");

/// Shared create/edit form.
pub const TASK_FORM_TEMPLATE: &str = include_str!("templates/task_form.html");

pub const PASSWORD_TEMPLATE: &str = include_str!("templates/password.html");

/// Escape text for HTML element content and attribute values.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Render a `?msg=` flash value. `success:` and `error:` prefixes pick the style.
pub fn flash_html(msg: Option<&str>) -> String {
    let Some(m) = msg.filter(|m| !m.is_empty()) else {
        return String::new();
    };
    let (class, text) = if let Some(stripped) = m.strip_prefix("success:") {
        ("message-success", stripped)
    } else if let Some(stripped) = m.strip_prefix("error:") {
        ("message-error", stripped)
    } else {
        ("message-success", m)
    };
    format!(
        r#"<div class="message {}">{}</div>"#,
        class,
        html_escape(text)
    )
}

fn nav_html(caller: Option<&Caller>) -> String {
    match caller {
        Some(caller) => format!(
            r#"<a href="/tasks">Tasks</a>
               <a href="/settings/password">Password</a>
               <span class="muted">{}</span>
               <form method="post" action="/logout"><button class="link" type="submit">Log out</button></form>"#,
            html_escape(&caller.account.display_name)
        ),
        None => r#"<a href="/login">Log in</a> <a href="/register">Register</a>"#.to_string(),
    }
}

/// Wrap page content in the layout.
pub fn render_page(title: &str, caller: Option<&Caller>, message: &str, content: &str) -> String {
    LAYOUT_TEMPLATE
        .replace("{{title}}", &html_escape(title))
        .replace("{{nav}}", &nav_html(caller))
        .replace("{{message}}", message)
        .replace("{{content}}", content)
}

/// Google sign-in block for the login and register pages.
pub fn google_button(enabled: bool) -> &'static str {
    if enabled {
        r#"<div class="divider">or</div>
    <p><a class="button secondary" href="/auth/google">Continue with Google</a></p>"#
    } else {
        ""
    }
}

/// `<option>` list with one entry marked selected.
pub fn options_html<'a>(
    options: impl IntoIterator<Item = (&'a str, &'a str)>,
    selected: Option<&str>,
) -> String {
    options
        .into_iter()
        .map(|(value, label)| {
            let sel = if selected == Some(value) { " selected" } else { "" };
            format!(
                r#"<option value="{}"{}>{}</option>"#,
                html_escape(value),
                sel,
                html_escape(label)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_flash_prefixes() {
        assert!(flash_html(Some("success:Saved")).contains("message-success"));
        let err = flash_html(Some("error:<bad>"));
        assert!(err.contains("message-error"));
        assert!(err.contains("&lt;bad&gt;"));
        assert_eq!(flash_html(None), "");
    }

    #[test]
    fn test_options_mark_selected() {
        let html = options_html([("open", "Open"), ("closed", "Closed")], Some("closed"));
        assert!(html.contains(r#"<option value="closed" selected>Closed</option>"#));
        assert!(html.contains(r#"<option value="open">Open</option>"#));
    }

    #[test]
    fn test_render_page_for_guest() {
        let html = render_page("Welcome", None, "", "<p>hi</p>");
        assert!(html.contains("<title>Welcome - Taskboard</title>"));
        assert!(html.contains(r#"href="/login""#));
        assert!(html.contains("<p>hi</p>"));
    }
}
