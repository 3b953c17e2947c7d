use addressbook_core::model::{ORGANISATIONAL, PERSONAL};
use addressbook_core::{Address, AddressBook, DaoError, DatabaseConfig};

fn run_scenario(book: &AddressBook) {
    book.reset().unwrap();
    book.load_samples().unwrap();

    let all = book.addresses().fetch_all().unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(all.iter().filter(|a| a.variant() == PERSONAL).count(), 5);
    assert_eq!(all.iter().filter(|a| a.variant() == ORGANISATIONAL).count(), 1);
    assert_eq!(book.communications().fetch_all().unwrap().len(), 2);

    let mut template = Address::default();
    template.nickname = "L%".to_string();
    let matches = book.addresses().find_by_example(&template).unwrap();
    let names: Vec<_> = matches.iter().map(|a| a.nickname.as_str()).collect();
    assert_eq!(names, vec!["Lups", "Lemmi"]);

    let mut lups = matches
        .into_iter()
        .find(|a| a.nickname == "Lups")
        .unwrap();
    let id = lups.id().unwrap();

    lups.nickname = "Lupsi".to_string();
    book.addresses().save(&mut lups).unwrap();
    book.addresses().commit().unwrap();
    assert_eq!(book.addresses().fetch(id).unwrap().unwrap().nickname, "Lupsi");

    lups.nickname = "Lupsi Wupsi".to_string();
    book.addresses().save(&mut lups).unwrap();
    book.addresses().rollback().unwrap();
    assert_eq!(lups.nickname, "Lupsi Wupsi");
    let committed = book.addresses().fetch(id).unwrap().unwrap();
    assert_eq!(committed.nickname, "Lupsi");

    // the rolled back save advanced only the in-memory version
    let err = book.addresses().delete(&lups).unwrap_err();
    assert!(matches!(err, DaoError::StaleVersion { .. }));

    book.addresses().delete(&committed).unwrap();
    book.addresses().commit().unwrap();
    assert!(book.addresses().fetch(id).unwrap().is_none());
    assert_eq!(book.addresses().fetch_all().unwrap().len(), 5);
}

#[test]
fn end_to_end_in_memory() {
    let book = AddressBook::in_memory().unwrap();
    run_scenario(&book);
    book.database().close_database().unwrap();
}

#[test]
fn end_to_end_on_file_can_be_repeated() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::file(dir.path().join("scenario.db"));

    for _ in 0..2 {
        let book = AddressBook::open(&config).unwrap();
        run_scenario(&book);
        book.database().close_database().unwrap();
    }
}
