/// Everything the invitation email shows.
#[derive(Debug, Clone)]
pub struct InvitationEmail<'a> {
    pub app_name: &'a str,
    pub base_url: &'a str,
    pub invitation_id: &'a str,
    pub recipient: &'a str,
    pub inviter_name: &'a str,
    pub inviter_email: &'a str,
    pub organization_name: &'a str,
    pub organization_logo: Option<&'a str>,
}

impl InvitationEmail<'_> {
    pub fn invite_link(&self) -> String {
        format!(
            "{}/accept-invitation/{}",
            self.base_url.trim_end_matches('/'),
            self.invitation_id
        )
    }

    pub fn subject(&self) -> String {
        format!("{} - Invitation to join organization", self.app_name)
    }

    pub fn render_html(&self) -> String {
        let app = escape(self.app_name);
        let org = escape(self.organization_name);
        let link = escape(&self.invite_link());
        let default_icon = format!("{}/static/icon.png", self.base_url.trim_end_matches('/'));
        let logo = escape(self.organization_logo.unwrap_or(&default_icon));

        format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family:sans-serif;background:#fff;margin:0 auto;padding:0 8px">
<div style="max-width:465px;margin:40px auto;border:1px solid #eaeaea;border-radius:4px;padding:20px">
<h1 style="font-size:24px;font-weight:normal;text-align:center">Join <strong>{org}</strong> on <strong>{app}</strong></h1>
<p>Hello {recipient},</p>
<p><strong>{inviter}</strong> (<a href="mailto:{inviter_email}">{inviter_email}</a>) has invited you to the <strong>{org}</strong> organization on <strong>{app}</strong>.</p>
<p style="text-align:center"><img src="{logo}" width="64" height="64" alt="{org} logo"></p>
<p style="text-align:center;margin:32px 0"><a href="{link}" style="background:#000;color:#fff;padding:12px 20px;border-radius:4px;text-decoration:none;font-size:12px;font-weight:600">Join the organization</a></p>
<p>or copy and paste this URL into your browser: <a href="{link}">{link}</a></p>
<hr style="border:1px solid #eaeaea">
<p style="font-size:12px;color:#666">If you were not expecting this invitation, you can ignore this email.</p>
</div>
</body>
</html>"#,
            recipient = escape(self.recipient),
            inviter = escape(self.inviter_name),
            inviter_email = escape(self.inviter_email),
        )
    }
}

pub(crate) fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> InvitationEmail<'static> {
        InvitationEmail {
            app_name: "Orgflow",
            base_url: "https://app.example.com/",
            invitation_id: "inv1",
            recipient: "a@b.com",
            inviter_name: "Ada <admin>",
            inviter_email: "ada@example.com",
            organization_name: "Acme & Co",
            organization_logo: None,
        }
    }

    #[test]
    fn link_points_at_the_accept_page() {
        assert_eq!(
            email().invite_link(),
            "https://app.example.com/accept-invitation/inv1"
        );
        assert_eq!(email().subject(), "Orgflow - Invitation to join organization");
    }

    #[test]
    fn html_escapes_user_supplied_text() {
        let html = email().render_html();
        assert!(html.contains("Ada &lt;admin&gt;"));
        assert!(html.contains("Acme &amp; Co"));
        assert!(!html.contains("<admin>"));
        assert!(html.contains("https://app.example.com/accept-invitation/inv1"));
        assert!(html.contains("https://app.example.com/static/icon.png"));
    }
}
