use formkeep_core::{EntityId, FieldValue, SectionName};
use formkeep_engine::{EngineError, FieldError, PageMode, SaveOutcome, SaveRejection, WriteOutcome};
use formkeep_harness::{TestPage, basic, lease, lease_entity, path, rent, tenants};

fn editing_page() -> Result<TestPage, Box<dyn std::error::Error>> {
    let mut page = TestPage::new()?;
    page.mount(42)?;
    page.enter_edit()?;
    Ok(page)
}

// ============================================================================
// Dirty / valid aggregation
// ============================================================================

#[test]
fn fresh_edit_session_is_clean_and_gate_closed() -> Result<(), Box<dyn std::error::Error>> {
    let page = editing_page()?;
    let aggregate = page.aggregate()?;
    assert!(!aggregate.any_dirty);
    assert!(!aggregate.can_save());
    assert!(!page.should_confirm_leave());
    assert_eq!(page.sections()?.names(), &[basic(), rent(), tenants()]);

    // Lease 42 has no start date: required fields count before anything renders.
    assert!(!aggregate.all_valid);
    assert_eq!(page.sections()?.invalid_sections(), vec![basic()]);
    assert!(page.section(&basic())?.errors.is_empty());
    assert_eq!(
        page.sections()?.section(&basic())?.errors().get(&path("start_date")?),
        Some(&FieldError::Required)
    );
    Ok(())
}

#[test]
fn required_field_blocks_save_without_binding() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("note")?, FieldValue::from("x"))?;

    let view = page.section(&basic())?;
    assert!(view.is_dirty);
    assert!(!view.is_valid);

    let err = page.save().unwrap_err();
    assert!(matches!(err, EngineError::InvalidSections(ref names) if names == &vec!["basic".to_string()]));
    assert_eq!(
        page.section(&basic())?.errors.get(&path("start_date")?),
        Some(&FieldError::Required)
    );
    assert!(page.backend().patches().is_empty());
    assert_eq!(page.mode(), PageMode::Editing);
    Ok(())
}

#[test]
fn written_field_validates_without_binding() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    page.set_field(&basic(), &path("end_date")?, FieldValue::from("soon"))?;

    assert!(page.sections()?.section(&basic())?.is_bound(&path("end_date")?));
    assert_eq!(
        page.section(&basic())?.errors.get(&path("end_date")?),
        Some(&FieldError::InvalidDate)
    );
    assert!(!page.aggregate()?.can_save());
    Ok(())
}

#[test]
fn one_dirty_section_opens_gate_only_when_all_valid() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.bind(&basic(), &path("start_date")?)?.ok_or("start_date should render")?;

    // Required start_date is empty: basic is invalid before any edit.
    assert!(!page.aggregate()?.all_valid);

    page.set_field(&rent(), &path("rent.due_day")?, FieldValue::Integer(15))?;
    let aggregate = page.aggregate()?;
    assert!(aggregate.any_dirty);
    assert!(!aggregate.can_save());

    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    let view = page.section(&basic())?;
    assert!(view.is_dirty);
    assert!(view.is_valid);
    assert!(page.aggregate()?.can_save());
    assert!(page.should_confirm_leave());
    Ok(())
}

#[test]
fn errors_are_hidden_until_touch_or_save_attempt() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    let start = page.bind(&basic(), &path("start_date")?)?.ok_or("start_date should render")?;
    let end = page.bind(&basic(), &path("end_date")?)?.ok_or("end_date should render")?;

    assert_eq!(start.error(page.sections()?)?, None);

    page.set_field(&basic(), &path("end_date")?, FieldValue::from("31.12.2024"))?;
    assert_eq!(end.error(page.sections()?)?, Some(FieldError::InvalidDate));
    assert_eq!(start.error(page.sections()?)?, None);

    let err = page.save().unwrap_err();
    assert!(matches!(err, EngineError::InvalidSections(ref names) if names == &vec!["basic".to_string()]));
    assert_eq!(start.error(page.sections()?)?, Some(FieldError::Required));
    assert_eq!(page.section(&basic())?.errors.len(), 2);
    assert!(page.backend().patches().is_empty());
    Ok(())
}

#[test]
fn nested_and_list_fields_validate() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    let amount = page.bind(&rent(), &path("rent.amount")?)?.ok_or("amount should render")?;
    let name = page.bind(&tenants(), &path("tenants[0].name")?)?.ok_or("name should render")?;

    page.set_field(&rent(), &path("rent.amount")?, FieldValue::Decimal(1200.555))?;
    page.set_field(&tenants(), &path("tenants[0].name")?, FieldValue::from(""))?;

    assert_eq!(amount.error(page.sections()?)?, Some(FieldError::TooManyDecimals { max: 2 }));
    assert_eq!(name.error(page.sections()?)?, Some(FieldError::Required));
    assert!(!page.section(&rent())?.is_valid);
    assert!(!page.section(&tenants())?.is_valid);

    page.set_field(&rent(), &path("rent.amount")?, FieldValue::Decimal(1250.5))?;
    page.set_field(&tenants(), &path("tenants[0].name")?, FieldValue::from("Eero"))?;
    assert!(page.aggregate()?.can_save());
    Ok(())
}

#[test]
fn parent_write_revalidates_bound_children() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    let name = page.bind(&tenants(), &path("tenants[0].name")?)?.ok_or("name should render")?;
    assert!(page.section(&tenants())?.is_valid);

    let outcome = page.set_field(&tenants(), &path("tenants")?, FieldValue::List(vec![FieldValue::object()]))?;
    assert_eq!(outcome, WriteOutcome::Applied);
    assert!(!page.section(&tenants())?.is_valid);
    assert_eq!(
        page.sections()?.section(&tenants())?.errors().get(name.path()),
        Some(&FieldError::Required)
    );

    page.set_field(&rent(), &path("rent")?, FieldValue::object_from([("due_day", FieldValue::Integer(3))]))?;
    assert_eq!(
        page.sections()?.section(&rent())?.errors().get(&path("rent.amount")?),
        Some(&FieldError::Required)
    );
    Ok(())
}

#[test]
fn appended_list_item_brings_its_required_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    assert!(page.section(&tenants())?.is_valid);

    page.set_field(&tenants(), &path("tenants[1].share")?, FieldValue::Decimal(0.5))?;
    let section = page.sections()?.section(&tenants())?;
    assert!(section.is_bound(&path("tenants[1].name")?));
    assert!(!section.is_valid());

    page.set_field(&tenants(), &path("tenants[1].name")?, FieldValue::from("Eero"))?;
    assert!(page.section(&tenants())?.is_valid);
    Ok(())
}

#[test]
fn list_index_past_the_end_is_refused() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    let huge = path(&format!("tenants[{}].name", usize::MAX))?;
    assert!(matches!(
        page.set_field(&tenants(), &huge, FieldValue::from("x")),
        Err(EngineError::Core(_))
    ));
    assert!(matches!(
        page.set_field(&tenants(), &path("tenants[5].name")?, FieldValue::from("x")),
        Err(EngineError::Core(_))
    ));
    let view = page.section(&tenants())?;
    assert!(!view.is_dirty);
    assert!(view.is_valid);
    Ok(())
}

#[test]
fn reverting_an_edit_makes_section_clean() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("note")?, FieldValue::from("draft"))?;
    assert!(page.section(&basic())?.is_dirty);
    page.set_field(&basic(), &path("note")?, FieldValue::from(""))?;
    assert!(!page.section(&basic())?.is_dirty);
    assert!(!page.should_confirm_leave());
    Ok(())
}

#[test]
fn extra_sections_participate_in_aggregate() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    let extra = SectionName::new("attachments");
    page.open_section(extra.clone(), FieldValue::object())?;
    assert!(matches!(
        page.open_section(extra.clone(), FieldValue::object()),
        Err(EngineError::DuplicateSection(_))
    ));
    assert!(matches!(
        page.open_section(SectionName::new("id"), FieldValue::object()),
        Err(EngineError::ReservedSectionName(_))
    ));
    assert!(matches!(page.section(&SectionName::new("nope")), Err(EngineError::UnknownSection(_))));
    Ok(())
}

#[test]
fn editing_requires_edit_mode() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = TestPage::new()?;
    page.mount(42)?;
    assert!(matches!(
        page.set_field(&basic(), &path("note")?, FieldValue::from("x")),
        Err(EngineError::NotEditing)
    ));
    assert!(matches!(page.save(), Err(EngineError::NotEditing)));
    page.enter_edit()?;
    assert!(matches!(page.enter_edit(), Err(EngineError::AlreadyEditing)));
    Ok(())
}

// ============================================================================
// Save and cancel
// ============================================================================

#[test]
fn save_sends_only_dirty_sections() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;

    let outcome = page.save()?;
    let SaveOutcome::Saved(record) = outcome else {
        return Err("expected a saved record".into());
    };
    assert_eq!(record.id, EntityId::new(42));

    let (_, _, payload) = &page.backend().patches()[0];
    let sent = payload.as_object().ok_or("payload should be an object")?;
    assert!(sent.contains_key("start_date"));
    assert!(!sent.contains_key("rent"));
    assert!(!sent.contains_key("tenants"));

    assert_eq!(page.mode(), PageMode::Viewing);
    assert!(!page.should_confirm_leave());
    assert_eq!(
        path("start_date")?.get(&page.entity()?.values),
        Some(&FieldValue::from("2024-01-01"))
    );
    let stored = page.backend().entity(&lease(), EntityId::new(42)).ok_or("entity missing")?;
    assert_eq!(path("start_date")?.get(stored), Some(&FieldValue::from("2024-01-01")));
    Ok(())
}

#[test]
fn save_with_nothing_dirty_sends_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = TestPage::new()?;
    let mut entity = lease_entity(42);
    path("start_date")?.set(&mut entity, FieldValue::from("2024-01-01"))?;
    page.backend_mut().insert_entity(&lease(), EntityId::new(42), entity);
    page.mount(42)?;
    page.enter_edit()?;

    page.set_field(&basic(), &path("note")?, FieldValue::from("draft"))?;
    page.set_field(&basic(), &path("note")?, FieldValue::from(""))?;
    assert_eq!(page.save()?, SaveOutcome::NothingToSave);
    assert!(page.backend().patches().is_empty());
    assert_eq!(page.mode(), PageMode::Editing);
    Ok(())
}

#[test]
fn rejected_save_keeps_edits_and_routes_errors() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    page.set_field(&tenants(), &path("tenants[0].share")?, FieldValue::Decimal(0.5))?;

    let body = serde_json::json!({
        "start_date": ["Overlaps lease 41."],
        "tenants": [{"share": ["Shares must add up to 1."]}],
        "non_field_errors": ["Contract is locked."]
    });
    page.backend_mut().reject_next_save(SaveRejection::from_json(&body));

    let err = page.save().unwrap_err();
    assert!(matches!(err, EngineError::SaveRejected(_)));
    assert_eq!(page.mode(), PageMode::Editing);
    assert!(page.section(&basic())?.is_dirty);
    assert_eq!(page.page_errors(), &["Contract is locked.".to_string()]);

    let basic_view = page.section(&basic())?;
    assert_eq!(
        basic_view.errors.get(&path("start_date")?),
        Some(&FieldError::Rejected(vec!["Overlaps lease 41.".into()]))
    );
    assert!(page.section(&tenants())?.errors.contains_key(&path("tenants[0].share")?));
    assert!(!page.aggregate()?.can_save());

    // Editing the rejected field clears the backend message.
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-02-01"))?;
    assert!(!page.section(&basic())?.errors.contains_key(&path("start_date")?));
    Ok(())
}

#[test]
fn rejection_on_read_only_field_does_not_block_resave() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    page.backend_mut().reject_next_save(SaveRejection::field(path("id")?, "Locked."));

    assert!(matches!(page.save(), Err(EngineError::SaveRejected(_))));
    assert_eq!(
        page.section(&basic())?.errors.get(&path("id")?),
        Some(&FieldError::Rejected(vec!["Locked.".into()]))
    );
    assert_eq!(page.set_field(&basic(), &path("id")?, FieldValue::Integer(1))?, WriteOutcome::ReadOnly);

    // Any edit in the section drops the backend's verdict.
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-02-01"))?;
    assert!(page.section(&basic())?.is_valid);
    assert!(matches!(page.save()?, SaveOutcome::Saved(_)));
    Ok(())
}

#[test]
fn resave_after_rejection_reaches_backend_again() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    let body = serde_json::json!({"start_date": ["Overlaps lease 41."]});
    page.backend_mut().reject_next_save(SaveRejection::from_json(&body));

    assert!(matches!(page.save(), Err(EngineError::SaveRejected(_))));
    assert!(!page.aggregate()?.can_save());

    // No edit: the retry is judged by the backend, not by the old message.
    assert!(matches!(page.save()?, SaveOutcome::Saved(_)));
    assert_eq!(page.backend().patches().len(), 2);
    Ok(())
}

#[test]
fn backend_failure_during_save_keeps_session() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    page.backend_mut().fail_next_call("timeout");
    assert!(matches!(page.save(), Err(EngineError::Backend(_))));
    assert_eq!(page.mode(), PageMode::Editing);
    assert!(page.should_confirm_leave());
    Ok(())
}

#[test]
fn cancel_resets_sections_and_leaves_edit_mode() -> Result<(), Box<dyn std::error::Error>> {
    let mut page = editing_page()?;
    page.set_field(&basic(), &path("start_date")?, FieldValue::from("2024-01-01"))?;
    page.cancel()?;

    assert_eq!(page.mode(), PageMode::Viewing);
    let view = page.section(&basic())?;
    assert!(!view.is_dirty);
    assert_eq!(path("start_date")?.get(&view.values), Some(&FieldValue::Null));
    assert!(matches!(page.cancel(), Err(EngineError::NotEditing)));

    // A new session starts from the server values again.
    page.enter_edit()?;
    assert!(!page.aggregate()?.any_dirty);
    assert_eq!(
        page.set_field(&basic(), &path("start_date")?, FieldValue::Null)?,
        WriteOutcome::Unchanged
    );
    Ok(())
}
