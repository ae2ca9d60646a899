mod common;

use common::{harness, image, Faults};
use souk::backend::{RecordsApi, LISTING_IMAGES_BUCKET};
use souk::db::models::{ListingStatus, Price};
use souk::error::FlowError;
use souk::flows::listing::ListingForm;

fn form(images: usize) -> ListingForm {
    let mut form = ListingForm::default();
    form.title = "Vintage denim jacket".into();
    form.description = "Worn twice, no stains, true to size.".into();
    form.price = "45".into();
    form.category_id = Some(1);
    form.condition = "like_new".into();
    if images > 0 {
        let files = (0..images).map(|i| image(&format!("photo{}.png", i))).collect();
        form.add_images(files, images.max(5)).unwrap();
    }
    form
}

#[tokio::test]
async fn listing_images_keep_their_order() {
    let h = harness();
    let seller = h.seller("sam").await;
    let flow = h.state.listing_flow();

    let listing = flow.submit(&form(3)).await.unwrap();
    assert_eq!(listing.status, ListingStatus::Active);
    assert_eq!(listing.price, Price(4500));
    assert_eq!(listing.currency, "USD");
    assert_eq!(listing.seller_id, seller.id);

    let detail = h.backend.inner.listing_detail(listing.id).await.unwrap().unwrap();
    assert_eq!(detail.listing.status, ListingStatus::Active);
    assert_eq!(detail.seller.unwrap().username, "sam");
    for (index, img) in detail.images.iter().enumerate() {
        assert!(
            img.image_url
                .contains(&format!("/storage/v1/object/public/listing-images/{}/{}/", seller.id, listing.id)),
            "{}",
            img.image_url
        );
        assert!(img.image_url.ends_with(&format!("-{}.png", index)));
    }

    assert_eq!(h.object_count(LISTING_IMAGES_BUCKET), 3);
    assert_eq!(h.backend.calls("insert_listing"), 1);
    assert_eq!(h.backend.calls("upload"), 3);
    assert_eq!(h.backend.calls("insert_listing_images"), 1);
}

#[tokio::test]
async fn sort_order_matches_selection_for_every_count() {
    let h = harness();
    h.seller("sam").await;
    let flow = h.state.listing_flow();

    for count in 1..=5 {
        let listing = flow.submit(&form(count)).await.unwrap();
        let detail = h.backend.inner.listing_detail(listing.id).await.unwrap().unwrap();
        let orders: Vec<i32> = detail.images.iter().map(|i| i.sort_order).collect();
        assert_eq!(orders, (0..count as i32).collect::<Vec<_>>(), "{} image(s)", count);
        for (index, img) in detail.images.iter().enumerate() {
            assert!(img.image_url.ends_with(&format!("-{}.png", index)));
        }
    }
}

#[tokio::test]
async fn one_image_over_the_limit_never_reaches_the_backend() {
    let h = harness();
    h.seller("sam").await;

    let err = h.state.listing_flow().submit(&form(6)).await.unwrap_err();
    let FlowError::Validation(ref errors) = err else {
        panic!("expected validation error");
    };
    assert!(errors.has("images"));
    assert_eq!(err.to_string(), "You can upload a maximum of 5 images.");
    assert_eq!(h.backend.calls("categories"), 0);
    assert_eq!(h.backend.calls("insert_listing"), 0);
    assert_eq!(h.backend.calls("upload"), 0);
}

#[tokio::test]
async fn failed_activation_marks_listing_incomplete() {
    let h = harness();
    h.seller("sam").await;
    h.backend.set_faults(Faults {
        fail_activation: true,
        ..Faults::default()
    });

    let err = h.state.listing_flow().submit(&form(3)).await.unwrap_err();
    let FlowError::ListingIncomplete {
        listing_id,
        saved_images,
        source,
    } = err
    else {
        panic!("expected incomplete listing");
    };
    assert_eq!(saved_images, 3);
    assert!(source.to_string().starts_with("Listing activation failed: "));

    let detail = h.backend.inner.listing_detail(listing_id).await.unwrap().unwrap();
    assert_eq!(detail.listing.status, ListingStatus::Incomplete);
    let orders: Vec<i32> = detail.images.iter().map(|i| i.sort_order).collect();
    assert_eq!(orders, vec![0, 1, 2]);
    assert_eq!(h.object_count(LISTING_IMAGES_BUCKET), 3);
}

#[tokio::test]
async fn zero_images_never_reaches_the_backend() {
    let h = harness();
    h.seller("sam").await;

    let err = h.state.listing_flow().submit(&form(0)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Please upload at least one image for your listing."
    );
    assert_eq!(h.backend.calls("insert_listing"), 0);
    assert_eq!(h.backend.calls("categories"), 0);
    assert_eq!(h.backend.calls("upload"), 0);
}

#[tokio::test]
async fn failed_upload_keeps_earlier_images_and_marks_incomplete() {
    let h = harness();
    h.seller("sam").await;
    h.backend.set_faults(Faults {
        fail_upload_at: Some(2),
        ..Faults::default()
    });

    let err = h.state.listing_flow().submit(&form(5)).await.unwrap_err();
    let FlowError::ListingIncomplete {
        listing_id,
        saved_images,
        source,
    } = err
    else {
        panic!("expected incomplete listing");
    };
    assert_eq!(saved_images, 2);
    assert!(matches!(*source, FlowError::Upload { ref file, .. } if file == "photo2.png"));

    let detail = h.backend.inner.listing_detail(listing_id).await.unwrap().unwrap();
    assert_eq!(detail.listing.status, ListingStatus::Incomplete);
    let orders: Vec<i32> = detail.images.iter().map(|i| i.sort_order).collect();
    assert_eq!(orders, vec![0, 1]);

    // Uploads stop at the first failure
    assert_eq!(h.backend.calls("upload"), 3);
    assert_eq!(h.object_count(LISTING_IMAGES_BUCKET), 2);
}

#[tokio::test]
async fn first_upload_failure_leaves_listing_without_images() {
    let h = harness();
    h.seller("sam").await;
    h.backend.set_faults(Faults {
        fail_upload_at: Some(0),
        ..Faults::default()
    });

    let err = h.state.listing_flow().submit(&form(2)).await.unwrap_err();
    let FlowError::ListingIncomplete {
        listing_id,
        saved_images,
        ..
    } = err
    else {
        panic!("expected incomplete listing");
    };
    assert_eq!(saved_images, 0);
    assert_eq!(h.backend.calls("insert_listing_images"), 0);

    let detail = h.backend.inner.listing_detail(listing_id).await.unwrap().unwrap();
    assert!(detail.images.is_empty());
    assert_eq!(detail.listing.status, ListingStatus::Incomplete);
}

#[tokio::test]
async fn failed_image_records_remove_uploaded_objects() {
    let h = harness();
    h.seller("sam").await;
    h.backend.set_faults(Faults {
        fail_image_batch: true,
        ..Faults::default()
    });

    let err = h.state.listing_flow().submit(&form(3)).await.unwrap_err();
    let FlowError::ListingIncomplete {
        listing_id,
        saved_images,
        source,
    } = err
    else {
        panic!("expected incomplete listing");
    };
    assert_eq!(saved_images, 0);
    assert!(source.to_string().starts_with("Image record insertion failed: "));
    assert_eq!(h.object_count(LISTING_IMAGES_BUCKET), 0);

    let detail = h.backend.inner.listing_detail(listing_id).await.unwrap().unwrap();
    assert_eq!(detail.listing.status, ListingStatus::Incomplete);
    assert!(detail.images.is_empty());
}

#[tokio::test]
async fn buyers_cannot_list() {
    let h = harness();
    h.buyer("bea").await;

    let err = h.state.listing_flow().submit(&form(1)).await.unwrap_err();
    assert!(matches!(err, FlowError::NotPermitted(_)));
    assert_eq!(h.backend.calls("insert_listing"), 0);
}

#[tokio::test]
async fn signed_out_users_cannot_list() {
    let h = harness();
    h.state.store.init().await;

    let err = h.state.listing_flow().submit(&form(1)).await.unwrap_err();
    assert!(matches!(err, FlowError::NotSignedIn));
}

#[tokio::test]
async fn unknown_category_is_rejected_before_insert() {
    let h = harness();
    h.seller("sam").await;

    let mut bad = form(1);
    bad.category_id = Some(999);
    let flow = h.state.listing_flow();
    let err = flow.submit(&bad).await.unwrap_err();
    assert_eq!(err.to_string(), "Please select a valid category.");
    assert_eq!(h.backend.calls("insert_listing"), 0);

    // Categories load once per flow
    flow.submit(&form(1)).await.unwrap();
    assert_eq!(h.backend.calls("categories"), 1);
}

#[tokio::test]
async fn listing_counts_toward_profile() {
    let h = harness();
    let seller = h.seller("sam").await;
    let flow = h.state.listing_flow();
    flow.submit(&form(1)).await.unwrap();
    flow.submit(&form(2)).await.unwrap();

    let page = h
        .state
        .display_flow()
        .profile_page("sam")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(page.profile.id, seller.id);
    assert_eq!(page.listing_count, 2);
    assert_eq!(page.post_count, 0);
}
