use log::debug;

use crate::compute::{ComputeApi, Image};
use crate::error::{Error, Result};

pub const COS_FAMILY: &str = "cos-cloud";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stable,
    Beta,
    Dev,
    Lts,
}

/// Up to four numeric name components; ordering is lexicographic.
pub type VersionTuple = [u32; 4];

/// Parses `cos[-arm64][-stable|-beta|-dev]-N[-N[-N[-N]]]`.
pub fn parse_cos_name(name: &str) -> Result<(Channel, VersionTuple)> {
    let bad = || Error::BadImageName(name.to_string());
    let mut parts = name.split('-').peekable();
    if parts.next() != Some("cos") {
        return Err(bad());
    }
    if parts.peek() == Some(&"arm64") {
        parts.next();
    }
    let channel = match parts.peek() {
        Some(&"stable") => Channel::Stable,
        Some(&"beta") => Channel::Beta,
        Some(&"dev") => Channel::Dev,
        _ => Channel::Lts,
    };
    if channel != Channel::Lts {
        parts.next();
    }

    let mut version = [0u32; 4];
    let mut count = 0;
    for part in parts {
        if count == version.len() {
            return Err(bad());
        }
        version[count] = part.parse().map_err(|_| bad())?;
        count += 1;
    }
    if count == 0 {
        return Err(bad());
    }
    Ok((channel, version))
}

pub fn not_deprecated(images: Vec<Image>) -> Vec<Image> {
    images.into_iter().filter(|im| !im.is_deprecated()).collect()
}

/// Picks the highest-versioned stable image, skipping other architectures.
pub fn select_stable(family: &str, images: &[Image]) -> Result<Image> {
    let mut best: Option<(VersionTuple, &Image)> = None;
    for im in images {
        if im.name.contains("arm64") {
            continue;
        }
        let (channel, version) = parse_cos_name(&im.name)?;
        if channel != Channel::Stable {
            continue;
        }
        if best.map_or(true, |(v, _)| version > v) {
            best = Some((version, im));
        }
    }
    best.map(|(_, im)| im.clone())
        .ok_or_else(|| Error::NoStableImage(family.to_string()))
}

pub async fn list_project_images<C: ComputeApi + ?Sized>(api: &C, family: &str) -> Result<Vec<Image>> {
    let images = api
        .list_images(family)
        .await
        .map_err(|e| Error::ImageLookup {
            family: family.to_string(),
            reason: e.to_string(),
        })?;
    Ok(not_deprecated(images))
}

pub async fn find_newest_stable_image<C: ComputeApi + ?Sized>(api: &C, family: &str) -> Result<Image> {
    if family != COS_FAMILY {
        return Err(Error::UnsupportedFamily(family.to_string()));
    }
    let images = list_project_images(api, family).await?;
    let image = select_stable(family, &images)?;
    debug!("newest stable image in {}: {}", family, image.name);
    Ok(image)
}

pub fn image_url(family: &str, image: &Image) -> String {
    format!(
        "https://www.googleapis.com/compute/v1/projects/{}/global/images/{}",
        family, image.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> Image {
        Image {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!(
            parse_cos_name("cos-stable-105-17412-156-30").unwrap(),
            (Channel::Stable, [105, 17412, 156, 30])
        );
        assert_eq!(
            parse_cos_name("cos-arm64-beta-109-17800-0").unwrap(),
            (Channel::Beta, [109, 17800, 0, 0])
        );
        assert_eq!(
            parse_cos_name("cos-97-16919-404-14").unwrap(),
            (Channel::Lts, [97, 16919, 404, 14])
        );
        assert_eq!(parse_cos_name("cos-dev-111").unwrap(), (Channel::Dev, [111, 0, 0, 0]));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_cos_name("ubuntu-2204-lts").is_err());
        assert!(parse_cos_name("cos-stable-abc").is_err());
        assert!(parse_cos_name("cos-stable").is_err());
        assert!(parse_cos_name("cos-1-2-3-4-5").is_err());
    }

    #[test]
    fn selects_newest_stable_only() {
        let images = vec![
            image("cos-97-16919-404-14"),
            image("cos-stable-105-17412-101-17"),
            image("cos-arm64-stable-109-17800-66-0"),
            image("cos-stable-105-17412-156-30"),
            image("cos-beta-109-17800-66-15"),
            image("cos-dev-111-18000-0-0"),
        ];
        let chosen = select_stable("cos-cloud", &images).unwrap();
        assert_eq!(chosen.name, "cos-stable-105-17412-156-30");
    }

    #[test]
    fn no_stable_image_is_an_error() {
        let images = vec![image("cos-beta-109-1"), image("cos-arm64-stable-109-1")];
        assert!(matches!(
            select_stable("cos-cloud", &images),
            Err(Error::NoStableImage(_))
        ));
        assert!(matches!(
            select_stable("cos-cloud", &[]),
            Err(Error::NoStableImage(_))
        ));
    }

    #[test]
    fn deprecated_images_are_dropped() {
        let mut old = image("cos-stable-200-1");
        old.deprecated = Some(serde_json::json!({"state": "DEPRECATED"}));
        let kept = not_deprecated(vec![old, image("cos-stable-105-1")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "cos-stable-105-1");
    }
}
