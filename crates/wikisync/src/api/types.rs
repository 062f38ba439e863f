//! Action API response types (`formatversion=2`).
//!
//! Only the fields the client reads are declared.

use serde::Deserialize;

/// `error` member present on failed requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensResponse {
    pub query: TokensQuery,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensQuery {
    pub tokens: Tokens,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tokens {
    pub csrftoken: Option<String>,
    pub logintoken: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub login: LoginResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
    pub result: String,
    pub reason: Option<String>,
    pub lgusername: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditResponse {
    pub edit: EditResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditResult {
    pub result: String,
    /// Present (as `true`) when the new text equals the current revision.
    #[serde(default)]
    pub nochange: bool,
    pub newrevid: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub upload: UploadResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResult {
    pub result: String,
    pub filename: Option<String>,
    pub warnings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageInfoResponse {
    #[serde(default)]
    pub query: Option<ImageInfoQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageInfoQuery {
    #[serde(default)]
    pub pages: Vec<ImageInfoPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageInfoPage {
    pub title: String,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageInfo {
    pub sha1: String,
    pub url: String,
}

/// Published file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Normalized page title, including the `File:` prefix.
    pub title: String,
    /// Lowercase hex SHA-1 of the current revision.
    pub sha1: String,
    pub url: String,
}

/// Lookup result for one requested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub title: String,
    /// `None` when the file does not exist.
    pub info: Option<FileInfo>,
}

impl From<ImageInfoPage> for FileStatus {
    fn from(page: ImageInfoPage) -> Self {
        let info = if page.missing {
            None
        } else {
            page.imageinfo.into_iter().next().map(|ii| FileInfo {
                title: page.title.clone(),
                sha1: ii.sha1.to_ascii_lowercase(),
                url: ii.url,
            })
        };
        FileStatus {
            title: page.title,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_nochange_defaults_to_false() {
        let resp: EditResponse =
            serde_json::from_str(r#"{"edit":{"result":"Success","newrevid":12}}"#).unwrap();
        assert!(!resp.edit.nochange);
        assert_eq!(resp.edit.newrevid, Some(12));

        let resp: EditResponse =
            serde_json::from_str(r#"{"edit":{"result":"Success","nochange":true}}"#).unwrap();
        assert!(resp.edit.nochange);
    }

    #[test]
    fn missing_page_has_no_info() {
        let resp: ImageInfoResponse = serde_json::from_str(
            r#"{"query":{"pages":[
                {"title":"File:A.png","missing":true},
                {"title":"File:B.png","imageinfo":[{"sha1":"ABCDEF","url":"https://img/b.png"}]}
            ]}}"#,
        )
        .unwrap();

        let statuses: Vec<FileStatus> = resp
            .query
            .unwrap()
            .pages
            .into_iter()
            .map(FileStatus::from)
            .collect();
        assert_eq!(statuses[0].info, None);
        assert_eq!(
            statuses[1].info,
            Some(FileInfo {
                title: "File:B.png".into(),
                sha1: "abcdef".into(),
                url: "https://img/b.png".into(),
            })
        );
    }
}
