//! Usage: HTML pages shown in the browser at the end of the redirect.

use html_escape::encode_text;

const SUCCESS_TEMPLATE: &str = include_str!("../../templates/oauth_success.html");
const ERROR_TEMPLATE: &str = include_str!("../../templates/oauth_error.html");

pub(crate) fn render_success(identity: &str, other_identities: &[String]) -> String {
    let others_html = if other_identities.is_empty() {
        String::new()
    } else {
        let items: String = other_identities
            .iter()
            .map(|id| format!("<li>{}</li>", encode_text(id)))
            .collect();
        format!(
            "<div class=\"others\">Other signed-in accounts:<ul>{items}</ul></div>"
        )
    };

    SUCCESS_TEMPLATE
        .replace("{{IDENTITY}}", &encode_text(identity))
        .replace("{{OTHER_ACCOUNTS}}", &others_html)
}

pub(crate) fn render_error(title: &str, detail: &str) -> String {
    ERROR_TEMPLATE
        .replace("{{TITLE}}", &encode_text(title))
        .replace("{{DETAIL}}", &encode_text(detail))
}

pub(crate) fn render_provider_error(error: &str, description: Option<&str>) -> String {
    let detail = match description.map(str::trim).filter(|v| !v.is_empty()) {
        Some(description) => format!("{error}: {description}"),
        None => error.to_string(),
    };
    render_error("Authorization was not granted", &detail)
}

pub(crate) fn render_timeout() -> String {
    render_error(
        "Still working",
        "The sign-in is taking longer than expected. Check your application for the result.",
    )
}
