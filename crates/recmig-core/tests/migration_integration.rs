//! Integration tests for full migration runs from record files.

use recmig_core::migration::ConfirmPolicy;
use recmig_core::store::WriteOperation;
use recmig_core::{
    Catalog, FieldDescribe, FileStore, MemoryStore, MigrationConfig, MigrationReport,
    MigrationRunner, ObjectDescribe, Operation, Record, Script, ScriptObject, StoreHandle, Value,
};
use std::path::PathBuf;
use std::time::SystemTime;

struct TestContext {
    dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, object: &str) -> PathBuf {
        self.dir.path().join(format!("{object}.csv"))
    }

    fn write(&self, object: &str, content: &str) {
        std::fs::write(self.path(object), content).unwrap();
    }

    fn read(&self, object: &str) -> String {
        std::fs::read_to_string(self.path(object)).unwrap()
    }

    fn modified(&self, object: &str) -> SystemTime {
        std::fs::metadata(self.path(object))
            .unwrap()
            .modified()
            .unwrap()
    }

    fn config(&self) -> MigrationConfig {
        MigrationConfig::default()
            .with_prompt(false)
            .with_report_dir(self.dir.path().join("reports"))
    }

    fn runner(&self, script: Script, target: MemoryStore) -> MigrationRunner {
        let source = StoreHandle::file("csv", FileStore::open(self.dir.path()).unwrap());
        MigrationRunner::new(script, source, StoreHandle::live("org", target))
            .with_config(self.config())
    }

    fn run(&self, script: Script, target: MemoryStore) -> (MigrationReport, MigrationRunner) {
        let mut runner = self.runner(script, target);
        let report = runner.run(&mut ConfirmPolicy::AlwaysAbort).unwrap();
        (report, runner)
    }

    fn issues_report(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("reports").join("CSVIssuesReport.csv"))
            .unwrap()
    }
}

fn schema() -> Catalog {
    Catalog::new()
        .with_object(ObjectDescribe::new("Region__c").with_fields(["Id", "Name", "Code__c"]))
        .with_object(
            ObjectDescribe::new("Site__c")
                .with_fields(["Id", "Name"])
                .with_field(FieldDescribe::reference("Region__c", "Region__c")),
        )
        .with_object(
            ObjectDescribe::new("Employee__c")
                .with_fields(["Id", "Name"])
                .with_field(FieldDescribe::reference("Manager__c", "Employee__c"))
                .with_field(FieldDescribe::reference("Site__c", "Site__c")),
        )
        .with_object(
            ObjectDescribe::new("Account")
                .with_fields(["Id", "Name", "AccountNumber"])
                .with_field(FieldDescribe::reference("RecordTypeId", "RecordType")),
        )
        .with_object(
            ObjectDescribe::new("Contact")
                .with_fields(["Id", "LastName"])
                .with_field(FieldDescribe::reference("Account__c", "Account")),
        )
        .with_object(
            ObjectDescribe::new("Case")
                .with_fields(["Id", "Subject", "Customer_number__c"])
                .with_field(FieldDescribe::reference("Account__c", "Account")),
        )
        .with_object(
            ObjectDescribe::new("RecordType")
                .with_fields(["Id", "Name", "DeveloperName", "SobjectType"]),
        )
}

fn entry(query: &str, operation: Operation, external_id: &str) -> ScriptObject {
    ScriptObject::new(query, operation).with_external_id(external_id)
}

fn regions_and_sites(ctx: &TestContext) -> Script {
    ctx.write("Region__c", "Id,Name,Code__c\nR1,North,N\nR2,South,S\n");
    ctx.write("Site__c", "Id,Name,Region__c\nS1,Mill,R2\nS2,Dock,R1\n");
    Script::new(vec![
        entry("SELECT Id, Name, Region__c FROM Site__c", Operation::Upsert, "Name"),
        entry("SELECT Id, Name, Code__c FROM Region__c", Operation::Upsert, "Code__c"),
    ])
}

#[test]
fn test_parent_written_first_and_lookup_resolved() {
    let ctx = TestContext::new();
    let script = regions_and_sites(&ctx);
    let (report, runner) = ctx.run(script, MemoryStore::new(schema()));

    assert_eq!(report.order, vec!["Region__c", "Site__c"]);
    let target = runner.target().memory_store().unwrap();
    let south = target.find("Region__c", "Code__c", "S").unwrap();
    let mill = target.find("Site__c", "Name", "Mill").unwrap();
    assert_eq!(mill.text("Region__c").as_deref(), south.id());
    assert!(ctx.read("Site__c").starts_with("Id,Name,Region__c,Region__r.Code__c"));
}

#[test]
fn test_record_types_first_and_keyed_by_object() {
    let ctx = TestContext::new();
    ctx.write("Account", "Id,Name,RecordTypeId\nA1,Acme,R1\n");
    ctx.write("RecordType", "Id,DeveloperName,SobjectType\nR1,Customer,Account\n");
    let target = MemoryStore::new(schema()).with_records(
        "RecordType",
        vec![
            Record::with_id("012C")
                .with("DeveloperName", "Customer")
                .with("SobjectType", "Contact"),
            Record::with_id("012A")
                .with("DeveloperName", "Customer")
                .with("SobjectType", "Account"),
        ],
    );
    let script = Script::new(vec![entry(
        "SELECT Id, Name, RecordTypeId FROM Account",
        Operation::Upsert,
        "Name",
    )]);
    let (report, runner) = ctx.run(script, target);

    assert_eq!(report.order[0], "RecordType");
    let acme = runner
        .target()
        .memory_store()
        .unwrap()
        .find("Account", "Name", "Acme")
        .unwrap();
    assert_eq!(acme.text("RecordTypeId").as_deref(), Some("012A"));
}

#[test]
fn test_unlisted_parent_read_once_and_matched_by_name() {
    let ctx = TestContext::new();
    ctx.write("Account", "Id,Name\nA1,Acme\n");
    ctx.write("Contact", "Id,LastName,Account__c\nK1,Doe,A1\n");
    ctx.write("Case", "Id,Subject,Account__c\nC1,Leak,A1\n");
    let target = MemoryStore::new(schema())
        .with_records("Account", vec![Record::with_id("001A").with("Name", "Acme")]);
    let script = Script::new(vec![
        entry("SELECT Id, LastName, Account__c FROM Contact", Operation::Insert, "LastName"),
        entry("SELECT Id, Subject, Account__c FROM Case", Operation::Insert, "Subject"),
    ]);
    let (report, runner) = ctx.run(script, target);

    assert_eq!(report.order.iter().filter(|o| *o == "Account").count(), 1);
    assert_eq!(report.order[0], "Account");
    let target = runner.target().memory_store().unwrap();
    assert_eq!(target.records("Account").len(), 1);
    let doe = target.find("Contact", "LastName", "Doe").unwrap();
    let leak = target.find("Case", "Subject", "Leak").unwrap();
    assert_eq!(doe.text("Account__c").as_deref(), Some("001A"));
    assert_eq!(leak.text("Account__c").as_deref(), Some("001A"));
}

#[test]
fn test_reconciling_repaired_files_changes_nothing() {
    let ctx = TestContext::new();
    let script = regions_and_sites(&ctx);

    let mut runner = ctx.runner(script.clone(), MemoryStore::new(schema()));
    runner.config_mut().validate_only = true;
    let report = runner.run(&mut ConfirmPolicy::AlwaysAbort).unwrap();
    assert!(report.validated_only);
    assert_eq!(ctx.issues_report().lines().count(), 1);

    let sites = (ctx.read("Site__c"), ctx.modified("Site__c"));
    let regions = (ctx.read("Region__c"), ctx.modified("Region__c"));

    let mut runner = ctx.runner(script, MemoryStore::new(schema()));
    runner.config_mut().validate_only = true;
    runner.run(&mut ConfirmPolicy::AlwaysAbort).unwrap();

    assert_eq!(ctx.issues_report().lines().count(), 1);
    assert_eq!((ctx.read("Site__c"), ctx.modified("Site__c")), sites);
    assert_eq!((ctx.read("Region__c"), ctx.modified("Region__c")), regions);
    assert!(runner.target().memory_store().unwrap().writes().is_empty());
}

#[test]
fn test_self_reference_resolved_after_own_write() {
    let ctx = TestContext::new();
    ctx.write("Employee__c", "Id,Name,Manager__c\nE1,Boss,\nE2,Staff,E1\n");
    let script = Script::new(vec![entry(
        "SELECT Id, Name, Manager__c FROM Employee__c",
        Operation::Upsert,
        "Name",
    )]);
    let (_, runner) = ctx.run(script, MemoryStore::new(schema()));

    let target = runner.target().memory_store().unwrap();
    let writes = target.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].operation, WriteOperation::Insert);
    assert!(writes[0].rows.iter().all(|r| !r.contains("Manager__c")));
    assert_eq!(writes[1].operation, WriteOperation::Update);

    let boss = target.find("Employee__c", "Name", "Boss").unwrap();
    let staff = target.find("Employee__c", "Name", "Staff").unwrap();
    assert_eq!(staff.text("Manager__c").as_deref(), boss.id());
}

#[test]
fn test_delete_old_data_with_nothing_to_delete() {
    let ctx = TestContext::new();
    ctx.write("Region__c", "Id,Name,Code__c\nR1,North,N\n");
    let script = Script::new(vec![entry(
        "SELECT Id, Name, Code__c FROM Region__c",
        Operation::Upsert,
        "Code__c",
    )
    .with_delete_old_data(None)]);
    let (report, runner) = ctx.run(script, MemoryStore::new(schema()));

    let target = runner.target().memory_store().unwrap();
    assert!(target.deletes().is_empty());
    assert_eq!(report.task("Region__c").unwrap().deleted, 0);
    assert_eq!(target.records("Region__c").len(), 1);
}

#[test]
fn test_unmatched_reference_omitted_and_empty_reference_nulled() {
    let ctx = TestContext::new();
    ctx.write("Account", "Id,Name\nA1,Acme\nA2,Globex\n");
    ctx.write("Contact", "Id,LastName,Account__c\nK1,Doe,A1\nK2,Roe,A2\nK3,Poe,\n");
    let target = MemoryStore::new(schema())
        .with_records("Account", vec![Record::with_id("001A").with("Name", "Acme")]);
    let script = Script::new(vec![
        entry("SELECT Id, Name FROM Account", Operation::Readonly, "Name"),
        entry("SELECT Id, LastName, Account__c FROM Contact", Operation::Insert, "LastName"),
    ]);
    let (report, runner) = ctx.run(script, target);

    assert_eq!(report.task("Contact").unwrap().missing_parents, 1);
    let target = runner.target().memory_store().unwrap();
    let rows = &target.writes()[0].rows;
    assert_eq!(rows[0].get("Account__c"), Some(&Value::from("001A")));
    assert!(!rows[1].contains("Account__c"));
    assert_eq!(rows[2].get("Account__c"), Some(&Value::Null));

    let missing = std::fs::read_to_string(
        ctx.dir
            .path()
            .join("reports")
            .join("MissingParentRecordsReport.csv"),
    )
    .unwrap();
    assert_eq!(missing.lines().count(), 2);
    assert!(missing.lines().nth(1).unwrap().contains("Globex"));
}

#[test]
fn test_compound_column_expanded_and_resolved() {
    let ctx = TestContext::new();
    ctx.write("Case", "Id,Subject,Account__c!Customer_number__c\nC1,Broken pump,ACC-7\n");
    let target = MemoryStore::new(schema()).with_records(
        "Account",
        vec![Record::with_id("001T")
            .with("Name", "Acme")
            .with("AccountNumber", "ACC-7")],
    );
    let script = Script::new(vec![
        entry("SELECT Id, Name, AccountNumber FROM Account", Operation::Readonly, "AccountNumber"),
        entry(
            "SELECT Id, Subject, Account__c, Customer_number__c FROM Case",
            Operation::Insert,
            "Subject",
        ),
    ]);
    let (_, runner) = ctx.run(script, target);

    let header = ctx.read("Case").lines().next().unwrap().to_string();
    assert!(!header.contains('!'));
    assert!(header.contains("Account__r.AccountNumber"));

    let case = runner
        .target()
        .memory_store()
        .unwrap()
        .find("Case", "Subject", "Broken pump")
        .unwrap()
        .clone();
    assert_eq!(case.text("Account__c").as_deref(), Some("001T"));
    assert_eq!(case.text("Customer_number__c").as_deref(), Some("ACC-7"));
}
