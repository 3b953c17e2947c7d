use addressbook_core::{
    Address, AddressBook, AddressDetails, CommType, Communication, DaoError, PersonalDetails,
    QueryParams, Value,
};

fn book_with_samples() -> AddressBook {
    let book = AddressBook::in_memory().unwrap();
    book.load_samples().unwrap();
    book
}

fn nicknames(addresses: &[Address]) -> Vec<&str> {
    addresses.iter().map(|a| a.nickname.as_str()).collect()
}

fn params(entries: &[(&str, Value)]) -> QueryParams {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

#[test]
fn wildcard_nickname_matches_exactly_the_expected_set() {
    let book = book_with_samples();
    let mut template = Address::default();
    template.nickname = "L%".to_string();

    let found = book.addresses().find_by_example(&template).unwrap();
    assert_eq!(nicknames(&found), vec!["Lups", "Lemmi"]);
}

#[test]
fn wildcard_matching_is_case_sensitive() {
    let book = book_with_samples();
    let mut template = Address::default();
    template.nickname = "l%".to_string();

    assert!(book.addresses().find_by_example(&template).unwrap().is_empty());
}

#[test]
fn single_character_wildcard_and_exact_match() {
    let book = book_with_samples();
    let mut template = Address::default();
    template.nickname = "P_pa".to_string();
    assert_eq!(
        nicknames(&book.addresses().find_by_example(&template).unwrap()),
        vec!["Pipa"]
    );

    template.nickname = "Pip".to_string();
    assert!(book.addresses().find_by_example(&template).unwrap().is_empty());
}

#[test]
fn empty_template_returns_every_entity_of_the_dao() {
    let book = book_with_samples();

    assert_eq!(
        book.addresses()
            .find_by_example(&Address::default())
            .unwrap()
            .len(),
        6
    );
    assert_eq!(
        book.personal()
            .find_by_example(&Address::default())
            .unwrap()
            .len(),
        5
    );
    assert_eq!(
        book.communications()
            .find_by_example(&Communication::default())
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn variant_fields_narrow_the_result() {
    let book = book_with_samples();
    let mut template = Address::default();
    template.details = AddressDetails::Personal(PersonalDetails {
        last_name: "P%".to_string(),
        ..PersonalDetails::default()
    });
    assert_eq!(
        nicknames(&book.personal().find_by_example(&template).unwrap()),
        vec!["Pipa", "Lups"]
    );

    let born = Address::personal("", "", "", Some(946_684_800_000));
    assert_eq!(
        nicknames(&book.addresses().find_by_example(&born).unwrap()),
        vec!["Pipa"]
    );

    let firm = Address::organisational("", "T%");
    assert_eq!(
        nicknames(&book.organisational().find_by_example(&firm).unwrap()),
        vec!["Die Firma"]
    );
}

#[test]
fn communication_template_matches_type_and_locator() {
    let book = book_with_samples();
    let mut template = Communication::default();
    template.comm_type = Some(CommType::Messenger);
    let found = book.communications().find_by_example(&template).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].locator, "telegram://Nico_Lausi_1234");

    let mut by_locator = Communication::default();
    by_locator.locator = r"telegram://Nico\_%".to_string();
    assert_eq!(
        book.communications()
            .find_by_example(&by_locator)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn find_returns_raw_rows_with_named_parameters() {
    let book = book_with_samples();
    let rows = book
        .addresses()
        .find_with_params(
            "SELECT a.nickname, p.last_name FROM addresses a \
             JOIN personal_addresses p ON p.id = a.id \
             WHERE p.born_at > :after ORDER BY a.id",
            &params(&[(":after", Value::Integer(1_000_000_000_000))]),
        )
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].columns(), &["nickname".to_string(), "last_name".to_string()]);
    assert_eq!(rows[0].get("nickname"), Some(&Value::Text("Doggi".to_string())));
    assert_eq!(rows[2].get("last_name"), Some(&Value::Text("Lemming".to_string())));
}

#[test]
fn parameter_prefixes_are_interchangeable() {
    let book = book_with_samples();
    for key in ["nick", ":nick", "@nick", "$nick"] {
        let rows = book
            .addresses()
            .find_with_params(
                "SELECT id FROM addresses WHERE nickname = @nick",
                &params(&[(key, Value::Text("Pipa".to_string()))]),
            )
            .unwrap();
        assert_eq!(rows.len(), 1, "key {key}");
    }
}

#[test]
fn malformed_query_is_a_syntax_error() {
    let book = book_with_samples();
    for query in ["SELEC nickname FROM addresses", "", "SELECT * FROM no_such_table"] {
        let err = book.addresses().find(query).unwrap_err();
        assert!(matches!(err, DaoError::QuerySyntax(_)), "query {query:?}");
    }
    let err = book.addresses().find("COMMIT").unwrap_err();
    assert!(matches!(err, DaoError::QuerySyntax(_)));
}

#[test]
fn commented_transaction_control_cannot_end_pending_work() {
    let book = AddressBook::in_memory().unwrap();
    let mut address = Address::personal("Lups", "Luna", "Pudel", None);
    let id = book.addresses().save(&mut address).unwrap();

    for query in ["/* note */ COMMIT", "-- keep\nROLLBACK", "/* a */ -- b\n  end"] {
        let err = book.addresses().find(query).unwrap_err();
        assert!(matches!(err, DaoError::QuerySyntax(_)), "query {query:?}");
        assert!(book.database().has_pending_transaction().unwrap());
    }

    book.addresses().rollback().unwrap();
    assert!(book.addresses().fetch(id).unwrap().is_none());
}

#[test]
fn binding_mismatches_are_reported() {
    let book = book_with_samples();
    let dao = book.addresses();

    let missing = dao
        .find("SELECT id FROM addresses WHERE nickname = :nick")
        .unwrap_err();
    assert!(matches!(missing, DaoError::ParameterBinding(message) if message.contains(":nick")));

    let extra = dao
        .find_with_params(
            "SELECT id FROM addresses",
            &params(&[("unused", Value::Integer(1))]),
        )
        .unwrap_err();
    assert!(matches!(extra, DaoError::ParameterBinding(message) if message.contains("unused")));

    let positional = dao
        .find_with_params(
            "SELECT id FROM addresses WHERE id = ?",
            &params(&[("id", Value::Integer(1))]),
        )
        .unwrap_err();
    assert!(matches!(positional, DaoError::ParameterBinding(_)));

    let duplicated = dao
        .find_with_params(
            "SELECT id FROM addresses WHERE id = :id",
            &params(&[("id", Value::Integer(1)), (":id", Value::Integer(2))]),
        )
        .unwrap_err();
    assert!(matches!(duplicated, DaoError::ParameterBinding(_)));
}

#[test]
fn writing_statements_join_the_shared_transaction() {
    let book = book_with_samples();
    let updated = book
        .addresses()
        .find_with_params(
            "UPDATE addresses SET nickname = :nick WHERE nickname = 'Pipa'",
            &params(&[("nick", Value::Text("Pipo".to_string()))]),
        )
        .unwrap();
    assert!(updated.is_empty());
    assert!(book.database().has_pending_transaction().unwrap());

    book.addresses().rollback().unwrap();
    let mut template = Address::default();
    template.nickname = "Pipa".to_string();
    assert_eq!(book.addresses().find_by_example(&template).unwrap().len(), 1);
}
