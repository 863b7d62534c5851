use changelog_core::{EntitySchema, FieldDescriptor, Generation, HistoryMeta};

/// Abstract base carrying the audit timestamps shared by the test models.
pub fn timestamped() -> EntitySchema {
    EntitySchema::new("tests", "Timestamped")
        .with_field(FieldDescriptor::timestamp("modified").generated(Generation::NowOnSave))
        .with_field(FieldDescriptor::timestamp("created").generated(Generation::NowOnCreate))
        .with_history(HistoryMeta::modified("modified"))
        .mark_abstract()
}

pub fn test_model() -> EntitySchema {
    EntitySchema::new("tests", "TestModel")
        .with_field(FieldDescriptor::auto_key("id"))
        .with_field(FieldDescriptor::text("text", Some(200)))
        .with_field(FieldDescriptor::integer("integer"))
        .inherit(&timestamped())
}

pub fn test2_model() -> EntitySchema {
    EntitySchema::new("tests", "Test2Model")
        .with_field(FieldDescriptor::auto_key("id"))
        .with_field(FieldDescriptor::text("text", Some(200)))
        .with_field(FieldDescriptor::integer("integer"))
        .inherit(&timestamped())
}

/// Model without a configured timestamp field; history uses capture time.
pub fn plain_note() -> EntitySchema {
    EntitySchema::new("tests", "PlainNote")
        .with_field(FieldDescriptor::auto_key("id"))
        .with_field(FieldDescriptor::text("body", None))
}

/// Model with a relation and a uuid key.
pub fn comment() -> EntitySchema {
    EntitySchema::new("tests", "Comment")
        .with_field(FieldDescriptor::uuid_key("id"))
        .with_field(FieldDescriptor::reference("note", "PlainNote"))
        .with_field(FieldDescriptor::text("body", None))
        .with_field(FieldDescriptor::boolean("approved"))
        .with_table("comments")
        .with_verbose_name("Comment")
}
