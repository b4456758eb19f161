//! Container registries
//!
//! Per region: list repositories, list the images of each repository, and
//! keep the most recently pushed image as the region's representative
//! record.

use crate::api::{CachedApi, ListRequest};
use crate::engine::module::{RegionOutput, RegionTask, ScanModule};
use crate::error::ScanError;
use crate::loot::LootFile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PUSHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRepository {
    pub repository_name: String,
    #[serde(default)]
    pub repository_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawImage {
    #[serde(default)]
    pub image_tags: Vec<String>,
    #[serde(default)]
    pub image_pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub image_size_in_bytes: Option<i64>,
    #[serde(default)]
    pub image_digest: Option<String>,
}

/// Representative image of a region
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Repository {
    pub service: String,
    pub region: String,
    pub name: String,
    /// Pullable reference: `<repositoryUri>:<tag>` when tagged, else
    /// `<repositoryUri>@<digest>`
    pub uri: String,
    pub pushed_at: String,
    pub image_tags: String,
    pub image_size: i64,
    pub digest: String,
}

/// Most recently pushed image. Equal timestamps resolve to the image the
/// API produced last; images without a timestamp sort first.
pub fn latest_image<'a, R>(images: &'a [(R, RawImage)]) -> Option<&'a (R, RawImage)> {
    images
        .iter()
        .max_by(|a, b| a.1.image_pushed_at.cmp(&b.1.image_pushed_at))
}

fn parse_items<T: for<'de> Deserialize<'de>>(
    region: &str,
    kind: &str,
    items: &[Value],
) -> Result<Vec<T>, ScanError> {
    items
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone())
                .map_err(|e| ScanError::transform(region, format!("{}: {}", kind, e)))
        })
        .collect()
}

/// Container registry module
#[derive(Debug, Default)]
pub struct RegistriesModule;

impl RegistriesModule {
    pub fn new() -> Self {
        Self
    }

    fn to_record(region: &str, repository: &RawRepository, image: &RawImage) -> Repository {
        let tag = image.image_tags.first().cloned().unwrap_or_default();
        let digest = image.image_digest.clone().unwrap_or_default();
        let uri = match (tag.is_empty(), digest.is_empty()) {
            (false, _) => format!("{}:{}", repository.repository_uri, tag),
            (true, false) => format!("{}@{}", repository.repository_uri, digest),
            (true, true) => repository.repository_uri.clone(),
        };

        Repository {
            service: "Registry".to_string(),
            region: region.to_string(),
            name: repository.repository_name.clone(),
            uri,
            pushed_at: image
                .image_pushed_at
                .map(|t| t.format(PUSHED_AT_FORMAT).to_string())
                .unwrap_or_default(),
            image_tags: tag,
            image_size: image.image_size_in_bytes.unwrap_or(0),
            digest,
        }
    }
}

#[async_trait]
impl ScanModule for RegistriesModule {
    type Record = Repository;

    fn name(&self) -> &'static str {
        "registries"
    }

    fn service(&self) -> &'static str {
        "registry"
    }

    async fn fetch_region(
        &self,
        api: &CachedApi,
        task: &RegionTask,
    ) -> Result<RegionOutput<Repository>, ScanError> {
        let region = task.region.as_str();

        let raw = api
            .list_all(&ListRequest::new(region, "repositories"))
            .await
            .map_err(|e| ScanError::fetch(region, e))?;
        let repositories: Vec<RawRepository> = parse_items(region, "repository", &raw)?;

        let mut images = Vec::new();
        for repository in &repositories {
            let request =
                ListRequest::new(region, "images").with_parent(&repository.repository_name);
            let raw = api
                .list_all(&request)
                .await
                .map_err(|e| ScanError::fetch(region, e))?;
            let parsed: Vec<RawImage> = parse_items(region, "image", &raw)?;
            images.extend(parsed.into_iter().map(|image| (repository, image)));
        }

        Ok(latest_image(&images)
            .map(|(repository, image)| Self::to_record(region, repository, image))
            .into_iter()
            .collect::<Vec<_>>()
            .into())
    }

    fn header(&self) -> Vec<&'static str> {
        vec![
            "Service",
            "Region",
            "Name",
            "URI",
            "PushedAt",
            "ImageTags",
            "ImageSize",
            "Digest",
        ]
    }

    fn row(&self, record: &Repository) -> Vec<String> {
        vec![
            record.service.clone(),
            record.region.clone(),
            record.name.clone(),
            record.uri.clone(),
            record.pushed_at.clone(),
            record.image_tags.clone(),
            record.image_size.to_string(),
            record.digest.clone(),
        ]
    }

    fn loot(&self, records: &[Repository]) -> Vec<LootFile> {
        if records.is_empty() {
            return Vec::new();
        }

        let mut out = String::new();
        out.push_str("#############################################\n");
        out.push_str("# Set $profile to the identity you will use to inspect these repositories.\n");
        out.push_str("# It is most likely not the identity used for this scan.\n");
        out.push_str("#############################################\n\n");

        for repo in records {
            let registry = repo.uri.split('/').next().unwrap_or(&repo.uri);
            out.push_str(&format!(
                "docker login {}  # region {}, authenticate with $profile\n",
                registry, repo.region
            ));
            out.push_str(&format!("docker pull {}\n", repo.uri));
            out.push_str(&format!("docker inspect {}\n", repo.uri));
            out.push_str(&format!("docker history --no-trunc {}\n", repo.uri));
            out.push_str(&format!("docker run -it --entrypoint /bin/sh {}\n", repo.uri));
            out.push_str(&format!(
                "docker save {} -o {}.tar\n\n",
                repo.uri,
                repo.name.replace('/', "_")
            ));
        }

        vec![LootFile::new("registry-pull-commands.txt", out)
            .with_hint("Use the commands below to authenticate to the registry and download the images that look interesting")]
    }
}
