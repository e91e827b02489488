//! URL builders for the mail API.

use url::Url;

/// A batched message action, posted with a list of uids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAction {
    /// Mark as read.
    Seen,
    /// Mark as unread.
    Unseen,
    /// Move to another folder.
    Move,
    /// Delete permanently.
    Delete,
    /// Report as spam.
    Spam,
    /// Report as not spam.
    Ham,
    /// Star.
    Star,
    /// Unstar.
    Unstar,
}

impl MessageAction {
    const fn path(self) -> &'static str {
        match self {
            Self::Seen => "seen",
            Self::Unseen => "unseen",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Spam => "spam",
            Self::Ham => "ham",
            Self::Star => "star",
            Self::Unstar => "unstar",
        }
    }
}

/// Builds endpoint URLs from the configured base URLs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    api: Url,
    manager: Url,
}

impl Endpoints {
    /// Creates endpoint builders for the given API and manager base URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if either base URL is invalid.
    pub fn new(api_base: &str, manager_base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            api: Url::parse(api_base)?,
            manager: Url::parse(manager_base)?,
        })
    }

    fn build(base: &Url, path: &str, query: &[(&str, Option<String>)]) -> Url {
        let mut url = base.clone();
        url.set_path(&format!("{}{path}", base.path().trim_end_matches('/')));
        append_query(&mut url, query);
        url
    }

    fn api(&self, path: &str, query: &[(&str, Option<String>)]) -> Url {
        Self::build(&self.api, path, query)
    }

    /// `GET /mailbox?with=unseen`
    #[must_use]
    pub fn mailboxes(&self) -> Url {
        self.api("/mailbox", &[("with", Some("unseen".into()))])
    }

    /// `GET /mailbox/quotas?mailbox=&product_id=`
    #[must_use]
    pub fn quotas(&self, mailbox: &str, product_id: i64) -> Url {
        self.api(
            "/mailbox/quotas",
            &[
                ("mailbox", Some(mailbox.to_string())),
                ("product_id", Some(product_id.to_string())),
            ],
        )
    }

    /// `GET /mail/{uuid}/folder`
    #[must_use]
    pub fn folders(&self, uuid: &str) -> Url {
        self.api(&format!("/mail/{uuid}/folder"), &[])
    }

    /// `GET /mail/{uuid}/folder/{folder}/message?offset=&thread=on&filters=`
    #[must_use]
    pub fn threads(&self, uuid: &str, folder_id: &str, offset: u32, filter: Option<&str>) -> Url {
        self.api(
            &format!("/mail/{uuid}/folder/{folder_id}/message"),
            &[
                ("offset", Some(offset.to_string())),
                ("thread", Some("on".into())),
                ("filters", filter.map(str::to_string)),
            ],
        )
    }

    /// `/mail/{uuid}/draft`
    #[must_use]
    pub fn draft(&self, uuid: &str) -> Url {
        self.api(&format!("/mail/{uuid}/draft"), &[])
    }

    /// `/mail/{uuid}/draft/{draft_uuid}`
    #[must_use]
    pub fn existing_draft(&self, uuid: &str, draft_uuid: &str) -> Url {
        self.api(&format!("/mail/{uuid}/draft/{draft_uuid}"), &[])
    }

    /// `POST /mail/{uuid}/draft/attachment`
    #[must_use]
    pub fn create_attachment(&self, uuid: &str) -> Url {
        self.api(&format!("/mail/{uuid}/draft/attachment"), &[])
    }

    /// `POST /mail/{uuid}/message/{action}`
    #[must_use]
    pub fn message_action(&self, uuid: &str, action: MessageAction) -> Url {
        self.api(&format!("/mail/{uuid}/message/{}", action.path()), &[])
    }

    /// `GET /pim/addressbook`
    #[must_use]
    pub fn address_books(&self) -> Url {
        self.api("/pim/addressbook", &[])
    }

    /// `GET /pim/contact/all?with=emails,details,others,contacted_times`
    #[must_use]
    pub fn contacts(&self) -> Url {
        self.api(
            "/pim/contact/all",
            &[("with", Some("emails,details,others,contacted_times".into()))],
        )
    }

    /// `POST /pim/contact`
    #[must_use]
    pub fn add_contact(&self) -> Url {
        self.api("/pim/contact", &[])
    }

    /// `GET /1/mail_hostings/{hosting_id}/mailboxes/{name}/signatures` on the manager host.
    #[must_use]
    pub fn signatures(&self, hosting_id: i64, mailbox_name: &str) -> Url {
        Self::build(
            &self.manager,
            &format!("/1/mail_hostings/{hosting_id}/mailboxes/{mailbox_name}/signatures"),
            &[],
        )
    }

    /// A server-provided resource path on the mail host, with `query`
    /// appended to any query the resource already carries.
    ///
    /// # Errors
    ///
    /// Returns an error if `resource` is not a valid URL reference.
    pub fn resource(
        &self,
        resource: &str,
        query: &[(&str, Option<String>)],
    ) -> Result<Url, url::ParseError> {
        let mut url = self.api.join(resource)?;
        append_query(&mut url, query);
        Ok(url)
    }

    /// `POST {resource}/blacklist`
    ///
    /// # Errors
    ///
    /// Returns an error if `resource` is not a valid URL reference.
    pub fn block_sender(&self, message_resource: &str) -> Result<Url, url::ParseError> {
        let mut url = self.resource(message_resource, &[])?;
        let path = format!("{}/blacklist", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

fn append_query(url: &mut Url, query: &[(&str, Option<String>)]) {
    let present: Vec<(&str, &str)> = query
        .iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (*name, v)))
        .collect();
    if present.is_empty() {
        return;
    }
    url.query_pairs_mut().extend_pairs(present);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("https://mail.example.com/api", "https://manager.example.com").unwrap()
    }

    #[test]
    fn test_threads_without_filter() {
        let url = endpoints().threads("u-1", "f-2", 50, None);
        assert_eq!(
            url.as_str(),
            "https://mail.example.com/api/mail/u-1/folder/f-2/message?offset=50&thread=on"
        );
    }

    #[test]
    fn test_threads_with_filter() {
        let url = endpoints().threads("u-1", "f-2", 0, Some("unseen"));
        assert_eq!(url.query(), Some("offset=0&thread=on&filters=unseen"));
    }

    #[test]
    fn test_message_actions() {
        let e = endpoints();
        assert_eq!(
            e.message_action("u", MessageAction::Ham).path(),
            "/api/mail/u/message/ham"
        );
        assert_eq!(
            e.message_action("u", MessageAction::Move).path(),
            "/api/mail/u/message/move"
        );
        assert_eq!(e.existing_draft("u", "d").path(), "/api/mail/u/draft/d");
        assert!(e.folders("u").query().is_none());
    }

    #[test]
    fn test_resource_merges_query_items() {
        let url = endpoints()
            .resource(
                "/api/mail/u/folder/f/message/12?foo=bar",
                &[("prefered_format", Some("html".into()))],
            )
            .unwrap();
        assert_eq!(url.host_str(), Some("mail.example.com"));
        assert_eq!(url.path(), "/api/mail/u/folder/f/message/12");
        assert_eq!(url.query(), Some("foo=bar&prefered_format=html"));
    }

    #[test]
    fn test_block_sender_appends_path() {
        let url = endpoints()
            .block_sender("/api/mail/u/folder/f/message/12")
            .unwrap();
        assert_eq!(url.path(), "/api/mail/u/folder/f/message/12/blacklist");
    }

    #[test]
    fn test_signatures_use_manager_host() {
        let url = endpoints().signatures(7, "john");
        assert_eq!(
            url.as_str(),
            "https://manager.example.com/1/mail_hostings/7/mailboxes/john/signatures"
        );
    }

    #[test]
    fn test_quotas() {
        let url = endpoints().quotas("john", 7);
        assert_eq!(url.path(), "/api/mailbox/quotas");
        assert_eq!(url.query(), Some("mailbox=john&product_id=7"));
    }
}
