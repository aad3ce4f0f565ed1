//! Upstream metadata normalization and registry publish documents.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::{Digest, Sha512};

use crate::model::{unscoped, Package};

/// Metadata fields copied verbatim from the upstream version document.
const PASSTHROUGH_FIELDS: [&str; 22] = [
    "scripts",
    "main",
    "module",
    "type",
    "description",
    "author",
    "license",
    "keywords",
    "homepage",
    "bugs",
    "engines",
    "os",
    "cpu",
    "dependencies",
    "peerDependencies",
    "devDependencies",
    "bundledDependencies",
    "optionalDependencies",
    "exports",
    "types",
    "files",
    "funding",
];

/// `bin` as the manifest format allows it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BinField {
    Path(String),
    Map(BTreeMap<String, String>),
}

/// `repository` as the manifest format allows it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RepositoryField {
    Shorthand(String),
    Object {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        directory: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Upstream version metadata in the single shape the receiving registry
/// accepts: `bin` and `repository` are always objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageMetadata {
    pub bin: Option<BTreeMap<String, String>>,
    pub repository: Option<Repository>,
    pub fields: Map<String, Value>,
}

impl PackageMetadata {
    /// Normalizes a raw upstream version document. Unrecognised `bin` or
    /// `repository` shapes are dropped rather than failing the upload.
    pub fn from_upstream(package_name: &str, raw: &Value) -> Self {
        let bin = raw
            .get("bin")
            .and_then(|v| serde_json::from_value::<BinField>(v.clone()).ok())
            .map(|bin| match bin {
                BinField::Path(path) => {
                    BTreeMap::from([(unscoped(package_name).to_string(), path)])
                }
                BinField::Map(map) => map,
            });

        let repository = raw
            .get("repository")
            .and_then(|v| serde_json::from_value::<RepositoryField>(v.clone()).ok())
            .and_then(normalize_repository);

        let fields = PASSTHROUGH_FIELDS
            .iter()
            .filter_map(|&key| raw.get(key).map(|v| (key.to_string(), v.clone())))
            .collect();

        Self {
            bin,
            repository,
            fields,
        }
    }
}

fn normalize_repository(field: RepositoryField) -> Option<Repository> {
    match field {
        RepositoryField::Object {
            kind,
            url,
            directory,
        } => url.map(|url| Repository {
            kind: kind.unwrap_or_else(|| "git".to_string()),
            url,
            directory,
        }),
        RepositoryField::Shorthand(spec) => {
            let hosted = [
                ("github:", "https://github.com/"),
                ("gitlab:", "https://gitlab.com/"),
                ("bitbucket:", "https://bitbucket.org/"),
            ];
            let mut kind = "git";
            let url = if let Some((prefix, host)) =
                hosted.iter().find(|(prefix, _)| spec.starts_with(prefix))
            {
                format!("git+{}{}.git", host, &spec[prefix.len()..])
            } else if let Some(id) = spec.strip_prefix("gist:") {
                kind = "gist";
                format!("https://gist.github.com/{}", id)
            } else if !spec.starts_with("http://")
                && !spec.starts_with("https://")
                && !spec.starts_with("git+")
                && spec.contains('/')
            {
                format!("git+https://github.com/{}.git", spec)
            } else {
                spec
            };
            Some(Repository {
                kind: kind.to_string(),
                url,
                directory: None,
            })
        }
    }
}

/// Content digests for a tarball.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarballDigest {
    /// `sha512-<base64>` subresource-integrity value.
    pub integrity: String,
    /// Legacy hex SHA-1 checksum.
    pub shasum: String,
}

pub fn digest(tarball: &[u8]) -> TarballDigest {
    TarballDigest {
        integrity: format!("sha512-{}", STANDARD.encode(Sha512::digest(tarball))),
        shasum: hex::encode(Sha1::digest(tarball)),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Dist {
    pub integrity: String,
    pub shasum: String,
    pub tarball: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionManifest {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub version: String,
    pub dist: Dist,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub content_type: String,
    /// Base64-encoded tarball.
    pub data: String,
    pub length: usize,
}

/// Body of the registry `PUT` that publishes one version.
#[derive(Debug, Clone, Serialize)]
pub struct PublishDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
    pub versions: BTreeMap<String, VersionManifest>,
    #[serde(rename = "_attachments")]
    pub attachments: BTreeMap<String, Attachment>,
}

impl PublishDocument {
    /// `package_url` is the registry URL of the package; the tarball is
    /// addressed as `<package_url>/-/<unscoped>-<version>.tgz`.
    pub fn build(
        package: &Package,
        metadata: &PackageMetadata,
        tarball: &[u8],
        package_url: &str,
    ) -> Self {
        let digest = digest(tarball);
        let file_name = format!("{}-{}.tgz", package.unscoped_name(), package.version);
        let manifest = VersionManifest {
            id: package.id(),
            name: package.name.clone(),
            version: package.version.clone(),
            dist: Dist {
                integrity: digest.integrity,
                shasum: digest.shasum,
                tarball: format!("{}/-/{}", package_url, file_name),
            },
            bin: metadata.bin.clone(),
            repository: metadata.repository.clone(),
            fields: metadata.fields.clone(),
        };

        Self {
            id: package.name.clone(),
            name: package.name.clone(),
            dist_tags: BTreeMap::from([("latest".to_string(), package.version.clone())]),
            versions: BTreeMap::from([(package.version.clone(), manifest)]),
            attachments: BTreeMap::from([(
                file_name,
                Attachment {
                    content_type: "application/octet-stream".to_string(),
                    data: STANDARD.encode(tarball),
                    length: tarball.len(),
                },
            )]),
        }
    }
}
