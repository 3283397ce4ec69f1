use resource_lifecycle::prelude::*;
use std::fs;
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> LoaderConfig {
    LoaderConfig::manual(dir.path())
}

#[test]
fn test_enumerate_finds_saved_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let guids: Vec<Guid> = {
        let app = App::bootstrap(config_for(&dir), HeadlessDevice::shared()).unwrap();
        (0..3)
            .map(|_| {
                let texture = Texture::new(Guid::new());
                app.loader().save_metadata(&texture).unwrap();
                texture.guid()
            })
            .collect()
    };
    fs::write(dir.path().join("notes.rbcmt"), b"not a guid").unwrap();
    fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

    let app = App::bootstrap(config_for(&dir), HeadlessDevice::shared()).unwrap();
    let mut expected = guids.clone();
    expected.sort();
    assert_eq!(app.loader().known_guids(), expected);
    // enumeration only lists names
    assert_eq!(app.loader().live_count(), 0);
    assert_eq!(app.loader().enumerate().unwrap(), 0);
}

#[test]
fn test_texture_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("textures")).unwrap();
    fs::write(dir.path().join("textures/atlas.pak"), [[1u8; 4], [2u8; 4], [3u8; 4]].concat())
        .unwrap();

    let app = App::bootstrap(config_for(&dir), HeadlessDevice::shared()).unwrap();
    let guid = Guid::new();
    let mut texture = Texture::new(guid);
    texture.set_desc(TextureDesc::new(2, 2, TextureFormat::R8));
    texture.set_source(ResourceSource::packed("textures/atlas.pak", 4, 4));
    app.loader().save_metadata(&texture).unwrap();
    assert!(dir.path().join(format!("{guid}.rbcmt")).exists());

    let texture = app.loader().load_as::<Texture>(guid, true).unwrap();
    app.loader().run_until_idle();
    let erased: RC<dyn Resource> = texture.clone().into();
    assert!(erased.loaded());
    assert_eq!(texture.with_pixels(|pixels| pixels.to_vec()), Some(vec![2; 4]));
}

#[test]
fn test_window_past_end_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("short.raw"), [0u8; 2]).unwrap();

    let app = App::bootstrap(config_for(&dir), HeadlessDevice::shared()).unwrap();
    let guid = Guid::new();
    let mut texture = Texture::new(guid);
    texture.set_desc(TextureDesc::new(2, 2, TextureFormat::R8));
    texture.set_source(ResourceSource::packed("short.raw", 8, 4));
    app.loader().save_metadata(&texture).unwrap();

    let resource = app.loader().load_resource(guid, true).unwrap();
    app.loader().run_until_idle();
    assert!(resource.failed());
    assert!(matches!(
        resource.last_error(),
        Some(ResourceError::CorruptPayload(_))
    ));
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loader.json");
    fs::write(
        &path,
        r#"{ "resource_dir": "assets", "worker_threads": 3, "metadata_extension": "meta" }"#,
    )
    .unwrap();

    let config = LoaderConfig::from_file(&path).unwrap();
    assert_eq!(config.worker_threads, 3);
    assert_eq!(config.metadata_extension, "meta");
    assert_eq!(config.backoff_limit, LoaderConfig::default().backoff_limit);

    let missing = LoaderConfig::from_file(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(missing, ResourceError::Config(_)));
}
