use rowbind_core::Model;
use rowbind_engine::MsgpackSerializer;
use rowbind_harness::{Dimensions, Parcel, TestDb};
use rowbind_storage::Store;

fn lamp() -> Dimensions {
    Dimensions {
        width_mm: 220,
        height_mm: 480,
        depth_mm: 220,
        fragile: true,
    }
}

#[test]
fn registered_serializer_roundtrips_custom_field() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = TestDb::new()?;
    db.engine.register_serializer(
        Dimensions::SERIALIZER,
        MsgpackSerializer::<Dimensions>::new(Dimensions::SERIALIZER),
    );
    let id = db.engine.save(&Model::new(Parcel::new("lamp", Some(lamp()))))?;

    let rows = db
        .engine
        .store()
        .raw_query(r#"SELECT "dimensions" FROM "Parcels""#, &[])?;
    assert!(rows[0].get_blob("dimensions")?.is_some_and(|b| !b.is_empty()));

    // a reader with its own cache and the same codec decodes the blob
    let reader = db.detached().with_codec(db.engine.codec().clone());
    let loaded = reader.load::<Parcel>(id)?.expect("row exists");
    assert_eq!(loaded.read().label, "lamp");
    assert_eq!(loaded.read().dimensions, Some(lamp()));
    Ok(())
}

#[test]
fn unregistered_serializer_leaves_column_null() -> Result<(), Box<dyn std::error::Error>> {
    let db = TestDb::new()?;
    let id = db.engine.save(&Model::new(Parcel::new("box", Some(lamp()))))?;

    let rows = db
        .engine
        .store()
        .raw_query(r#"SELECT "dimensions" FROM "Parcels""#, &[])?;
    assert!(rows[0].is_null("dimensions"));

    let loaded = db.detached().load::<Parcel>(id)?.expect("row exists");
    assert_eq!(loaded.read().label, "box");
    assert!(loaded.read().dimensions.is_none());
    Ok(())
}

#[test]
fn parcel_without_dimensions_saves() -> Result<(), Box<dyn std::error::Error>> {
    let mut db = TestDb::new()?;
    db.engine.register_serializer(
        Dimensions::SERIALIZER,
        MsgpackSerializer::<Dimensions>::new(Dimensions::SERIALIZER),
    );
    let id = db.engine.save(&Model::new(Parcel::new("letter", None)))?;
    let loaded = db.detached().load::<Parcel>(id)?.expect("row exists");
    assert!(loaded.read().dimensions.is_none());
    Ok(())
}
