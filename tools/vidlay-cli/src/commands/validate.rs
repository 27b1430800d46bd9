//! Validate a transform file and show where it lands.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use vidlay_render_model::{resolve_scale, FrameSize, Transform};

pub fn run(path: PathBuf, source: Option<String>, target: Option<String>) -> anyhow::Result<()> {
    let transform = load_transform(&path)?;
    println!("Transform OK: {}", path.display());
    println!("  Position:  ({:.2}, {:.2})", transform.left, transform.top);
    println!("  Scale:     {:.4} x {:.4}", transform.scale_x, transform.scale_y);
    println!("  Angle:     {:.2} deg", transform.angle);
    println!(
        "  Original:  {:.0} x {:.0}",
        transform.original_width, transform.original_height
    );
    let (width, height) = transform.placed_size();
    println!("  Placed:    {width:.2} x {height:.2}");

    let source = match source {
        Some(raw) => Some(parse_size(&raw)?),
        None => transform.canvas,
    };
    if let Some(canvas) = source {
        println!("  Canvas:    {:.0} x {:.0}", canvas.width, canvas.height);
    }

    if let Some(raw) = target {
        let target = parse_size(&raw)?;
        let scale = resolve_scale(source, Some(target));
        let (x, y) = transform.output_origin(scale);
        println!(
            "  In {:.0}x{:.0}: origin ({x:.2}, {y:.2}), factor {:.4} x {:.4}",
            target.width, target.height, scale.x, scale.y
        );
    }

    Ok(())
}

/// Read and validate a transform JSON file.
pub fn load_transform(path: &Path) -> anyhow::Result<Transform> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transform file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Transform::validate(&value).with_context(|| format!("Invalid transform in {}", path.display()))
}

fn parse_size(raw: &str) -> anyhow::Result<FrameSize> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("frame size `{raw}` is not WxH"))?;
    let size = FrameSize::new(
        w.trim().parse().with_context(|| format!("bad width in `{raw}`"))?,
        h.trim().parse().with_context(|| format!("bad height in `{raw}`"))?,
    );
    if !size.is_usable() {
        anyhow::bail!("frame size `{raw}` must be positive");
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        let size = parse_size("1920x1080").unwrap();
        assert_eq!(size.width, 1920.0);
        assert_eq!(size.height, 1080.0);
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn test_load_transform_recomputes_derived_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(
            &path,
            r#"{"left":10,"top":20,"scaleX":2,"scaleY":0.5,"originalWidth":100,"originalHeight":40,"width":1}"#,
        )
        .unwrap();
        let transform = load_transform(&path).unwrap();
        assert_eq!(transform.width, 200.0);
        assert_eq!(transform.height, 20.0);
        assert_eq!(transform.angle, 0.0);
    }

    #[test]
    fn test_load_transform_rejects_missing_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, r#"{"left":10,"top":20,"scaleX":2}"#).unwrap();
        assert!(load_transform(&path).is_err());
    }
}
