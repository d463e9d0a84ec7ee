use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use csv::{ByteRecord, ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

use crate::models::{AttendanceRecord, Dataset, GradeRecord, PassStatus};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to open {name}")]
    Open {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {name}")]
    Csv {
        name: String,
        #[source]
        source: csv::Error,
    },
    #[error("failed to read workbook {name}")]
    Workbook {
        name: String,
        #[source]
        source: calamine::Error,
    },
    #[error("{name} has no worksheets")]
    MissingSheet { name: String },
    #[error("{name} has no {column} column")]
    MissingColumn { name: String, column: &'static str },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GradeRow {
    #[serde(rename = "ESTUDANTE", alias = "STUDENT")]
    student: Option<String>,
    #[serde(rename = "TURMA", alias = "CLASS")]
    class: Option<String>,
    #[serde(rename = "DISCIPLINA", alias = "SUBJECT")]
    subject: Option<String>,
    #[serde(rename = "NOTA 1º BIMESTRE", alias = "SCORE 1")]
    score_1: Option<String>,
    #[serde(rename = "NOTA 2º BIMESTRE", alias = "SCORE 2")]
    score_2: Option<String>,
    #[serde(rename = "NOTA 3º BIMESTRE", alias = "SCORE 3")]
    score_3: Option<String>,
    #[serde(rename = "NOTA 4º BIMESTRE", alias = "SCORE 4")]
    score_4: Option<String>,
    #[serde(
        rename = "EVOLUÇÃO 1º BIM X 2ºBIM",
        alias = "EVOLUÇÃO 1º BIM X 2º BIM",
        alias = "DELTA 1-2"
    )]
    delta_1_2: Option<String>,
    #[serde(rename = "EVOLUÇÃO 2º BIM X 3º BIM", alias = "DELTA 2-3")]
    delta_2_3: Option<String>,
    #[serde(rename = "EVOLUÇÃO 3º BIM X 4º BIM", alias = "DELTA 3-4")]
    delta_3_4: Option<String>,
    #[serde(rename = "MÉDIA FINAL", alias = "FINAL AVERAGE")]
    final_average: Option<String>,
    #[serde(rename = "SITUAÇÃO NOTA", alias = "GRADE STATUS")]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttendanceRow {
    #[serde(rename = "ESTUDANTE", alias = "STUDENT")]
    student: Option<String>,
    #[serde(rename = "TURMA", alias = "CLASS")]
    class: Option<String>,
    #[serde(rename = "DISCIPLINA", alias = "SUBJECT")]
    subject: Option<String>,
    #[serde(rename = "FALTAS 1º BIMESTRE", alias = "ABSENCES 1")]
    absences_1: Option<String>,
    #[serde(rename = "FALTAS 2º BIMESTRE", alias = "ABSENCES 2")]
    absences_2: Option<String>,
    #[serde(rename = "FALTAS 3º BIMESTRE", alias = "ABSENCES 3")]
    absences_3: Option<String>,
    #[serde(rename = "FALTAS 4º BIMESTRE", alias = "ABSENCES 4")]
    absences_4: Option<String>,
    #[serde(rename = "TOTAL DE AULAS", alias = "TOTAL CLASSES")]
    total_classes: Option<String>,
    #[serde(rename = "TOTAL DE FALTAS", alias = "TOTAL ABSENCES")]
    total_absences: Option<String>,
    #[serde(rename = "PERCENTUAL DE PRESENÇA", alias = "ATTENDANCE PERCENT")]
    attendance_percent: Option<String>,
    #[serde(rename = "SITUAÇÃO PRESENÇA", alias = "ATTENDANCE STATUS")]
    status: Option<String>,
}

/// Blank and `-` cells are missing data; accepts `,` or `.` as the decimal separator.
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let value = raw?.trim();
    if value.is_empty() || value == "-" {
        return None;
    }
    let value = value.strip_suffix('%').unwrap_or(value).trim_end();
    value
        .replacen(',', ".", 1)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_count(raw: Option<&str>) -> Option<u32> {
    parse_number(raw)
        .filter(|v| *v >= 0.0)
        .map(|v| v.round() as u32)
}

pub fn parse_status(raw: Option<&str>) -> PassStatus {
    match raw.map(|s| s.trim().to_uppercase()).as_deref() {
        Some("APROVADO") | Some("PASSED") | Some("APPROVED") => PassStatus::Passed,
        _ => PassStatus::Failed,
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .trim()
        .nfc()
        .collect::<String>()
        .to_uppercase()
}

/// A header row plus its data rows, whichever file format they came from.
struct Sheet {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Sheet {
    fn new<I>(name: &str, headers: I, rows: Vec<StringRecord>) -> Result<Self, ImportError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let headers: StringRecord = headers
            .into_iter()
            .map(|h| normalize_header(h.as_ref()))
            .collect();

        if !headers.iter().any(|h| h == "ESTUDANTE" || h == "STUDENT") {
            return Err(ImportError::MissingColumn {
                name: name.to_string(),
                column: "ESTUDANTE",
            });
        }

        Ok(Self { headers, rows })
    }

    fn rows<'a, T: Deserialize<'a> + Default>(&'a self) -> impl Iterator<Item = T> + 'a {
        self.rows.iter().enumerate().map(move |(index, record)| {
            record.deserialize(Some(&self.headers)).unwrap_or_else(|err| {
                tracing::warn!(row = index + 2, %err, "unreadable row; treating as blank");
                T::default()
            })
        })
    }

    fn grades(&self) -> Vec<GradeRecord> {
        self.rows::<GradeRow>().map(grade_from_row).collect()
    }

    fn attendance(&self) -> Vec<AttendanceRecord> {
        self.rows::<AttendanceRow>().map(attendance_from_row).collect()
    }
}

/// UTF-8 when valid, Latin-1 otherwise; spreadsheet exports use either.
fn decode_field(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn decode_record(record: &ByteRecord) -> StringRecord {
    record.iter().map(decode_field).collect()
}

fn csv_sheet<R: Read>(source: R, name: &str, delimiter: u8) -> Result<Sheet, ImportError> {
    let csv_error = |source| ImportError::Csv {
        name: name.to_string(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(source);

    let headers = decode_record(reader.byte_headers().map_err(csv_error)?);
    let rows = reader
        .byte_records()
        .map(|record| record.map(|r| decode_record(&r)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(csv_error)?;

    Sheet::new(name, headers.iter(), rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.trim().to_string(),
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        other => other.to_string(),
    }
}

/// `Ok(None)` when the workbook has no sheet at `index` or the sheet is blank.
fn workbook_sheet(
    workbook: &mut Sheets<BufReader<File>>,
    index: usize,
    name: &str,
) -> Result<Option<Sheet>, ImportError> {
    let Some(range) = workbook.worksheet_range_at(index) else {
        return Ok(None);
    };
    let range = range.map_err(|source| ImportError::Workbook {
        name: name.to_string(),
        source,
    })?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(None);
    };
    let headers: Vec<String> = header_row.iter().map(cell_text).collect();
    let records = rows
        .map(|row| row.iter().map(cell_text).collect::<StringRecord>())
        .collect();

    Sheet::new(name, headers, records).map(Some)
}

fn open_workbook(path: &Path) -> Result<Sheets<BufReader<File>>, ImportError> {
    open_workbook_auto(path).map_err(|source| ImportError::Workbook {
        name: path.display().to_string(),
        source,
    })
}

/// First sheet is grades; the second, when present, is attendance.
pub fn read_workbook(
    path: &Path,
) -> Result<(Vec<GradeRecord>, Option<Vec<AttendanceRecord>>), ImportError> {
    let name = path.display().to_string();
    let mut workbook = open_workbook(path)?;

    let grades = workbook_sheet(&mut workbook, 0, &name)?
        .ok_or_else(|| ImportError::MissingSheet { name: name.clone() })?
        .grades();
    let attendance = if workbook.sheet_names().len() > 1 {
        Some(
            workbook_sheet(&mut workbook, 1, &name)?
                .map(|sheet| sheet.attendance())
                .unwrap_or_default(),
        )
    } else {
        None
    };

    Ok((grades, attendance))
}

fn text(value: Option<String>) -> String {
    value.unwrap_or_default()
}

fn grade_from_row(row: GradeRow) -> GradeRecord {
    GradeRecord {
        student: text(row.student),
        class: text(row.class),
        subject: text(row.subject),
        scores: [
            parse_number(row.score_1.as_deref()),
            parse_number(row.score_2.as_deref()),
            parse_number(row.score_3.as_deref()),
            parse_number(row.score_4.as_deref()),
        ],
        delta_1_2: parse_number(row.delta_1_2.as_deref()),
        delta_2_3: parse_number(row.delta_2_3.as_deref()),
        delta_3_4: parse_number(row.delta_3_4.as_deref()),
        final_average: parse_number(row.final_average.as_deref()),
        pass_status: parse_status(row.status.as_deref()),
    }
}

fn attendance_from_row(row: AttendanceRow) -> AttendanceRecord {
    AttendanceRecord {
        student: text(row.student),
        class: text(row.class),
        subject: text(row.subject),
        absences: [
            parse_count(row.absences_1.as_deref()),
            parse_count(row.absences_2.as_deref()),
            parse_count(row.absences_3.as_deref()),
            parse_count(row.absences_4.as_deref()),
        ],
        total_classes: parse_count(row.total_classes.as_deref()).unwrap_or(0),
        total_absences: parse_count(row.total_absences.as_deref()).unwrap_or(0),
        attendance_percent: parse_number(row.attendance_percent.as_deref()).unwrap_or(0.0),
        pass_status: parse_status(row.status.as_deref()),
    }
}

pub fn read_grades<R: Read>(
    source: R,
    name: &str,
    delimiter: u8,
) -> Result<Vec<GradeRecord>, ImportError> {
    Ok(csv_sheet(source, name, delimiter)?.grades())
}

pub fn read_attendance<R: Read>(
    source: R,
    name: &str,
    delimiter: u8,
) -> Result<Vec<AttendanceRecord>, ImportError> {
    Ok(csv_sheet(source, name, delimiter)?.attendance())
}

fn open_file(path: &Path) -> Result<File, ImportError> {
    File::open(path).map_err(|source| ImportError::Open {
        name: path.display().to_string(),
        source,
    })
}

fn is_workbook(path: &Path) -> bool {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    matches!(
        extension.as_deref(),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("ods")
    )
}

fn read_attendance_file(path: &Path, delimiter: u8) -> Result<Vec<AttendanceRecord>, ImportError> {
    if is_workbook(path) {
        let name = path.display().to_string();
        let mut workbook = open_workbook(path)?;
        return Ok(workbook_sheet(&mut workbook, 0, &name)?
            .map(|sheet| sheet.attendance())
            .unwrap_or_default());
    }
    read_attendance(open_file(path)?, &path.display().to_string(), delimiter)
}

/// Reads a grades sheet and an optional attendance sheet into a fresh dataset.
/// A workbook (`.xlsx`, `.xls`, `.ods`) carries both; any other file is CSV.
/// An explicit attendance file wins over a workbook's second sheet.
#[tracing::instrument(skip_all, fields(grades = %grades_path.display()))]
pub fn read_dataset(
    grades_path: &Path,
    attendance_path: Option<&Path>,
    delimiter: u8,
) -> Result<Dataset, ImportError> {
    let (grades, workbook_attendance) = if is_workbook(grades_path) {
        read_workbook(grades_path)?
    } else {
        let name = grades_path.display().to_string();
        (read_grades(open_file(grades_path)?, &name, delimiter)?, None)
    };

    let attendance = match (attendance_path, workbook_attendance) {
        (Some(path), _) => read_attendance_file(path, delimiter)?,
        (None, Some(attendance)) => attendance,
        (None, None) => {
            tracing::warn!("no attendance sheet given; attendance will be empty");
            Vec::new()
        }
    };

    let unnamed = grades.iter().filter(|g| g.student.is_empty()).count();
    if unnamed > 0 {
        tracing::warn!(rows = unnamed, "grade rows without a student name");
    }
    tracing::info!(
        grades = grades.len(),
        attendance = attendance.len(),
        "read spreadsheet"
    );

    Ok(Dataset { grades, attendance })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRADES_CSV: &str = "\u{feff}Estudante,Turma,Disciplina,NOTA 1º BIMESTRE,NOTA 2º BIMESTRE,NOTA 3º BIMESTRE,NOTA 4º BIMESTRE,EVOLUÇÃO 1º BIM X 2ºBIM,EVOLUÇÃO 2º BIM X 3º BIM,EVOLUÇÃO 3º BIM X 4º BIM,MÉDIA FINAL,SITUAÇÃO NOTA
Ana Souza,9A,Matemática,6.0,4.0,5.0,7.0,-2.0,1.0,2.0,5.5,REPROVADO
Bruno Lima,9A,História,8,9,,-,1,,,8.5,APROVADO
Caio,9B,Arte,x,,,,,,,,
";

    #[test]
    fn parses_numbers_with_either_separator() {
        assert_eq!(parse_number(Some("7,5")), Some(7.5));
        assert_eq!(parse_number(Some(" 7.5 ")), Some(7.5));
        assert_eq!(parse_number(Some("82,5%")), Some(82.5));
        assert_eq!(parse_number(Some("-1,5")), Some(-1.5));
        assert_eq!(parse_number(Some("-")), None);
        assert_eq!(parse_number(Some("")), None);
        assert_eq!(parse_number(Some("abc")), None);
        assert_eq!(parse_number(Some("NaN")), None);
        assert_eq!(parse_number(None), None);
    }

    #[test]
    fn status_defaults_to_failed() {
        assert_eq!(parse_status(Some("aprovado")), PassStatus::Passed);
        assert_eq!(parse_status(Some("PASSED")), PassStatus::Passed);
        assert_eq!(parse_status(Some("REPROVADO")), PassStatus::Failed);
        assert_eq!(parse_status(Some("")), PassStatus::Failed);
        assert_eq!(parse_status(None), PassStatus::Failed);
    }

    #[test]
    fn reads_grade_sheet_with_source_headers() {
        let grades = read_grades(GRADES_CSV.as_bytes(), "grades.csv", b',').expect("grades");
        assert_eq!(grades.len(), 3);

        let ana = &grades[0];
        assert_eq!(ana.student, "Ana Souza");
        assert_eq!(ana.subject, "Matemática");
        assert_eq!(ana.scores, [Some(6.0), Some(4.0), Some(5.0), Some(7.0)]);
        assert_eq!(ana.delta_1_2, Some(-2.0));
        assert_eq!(ana.final_average, Some(5.5));
        assert_eq!(ana.pass_status, PassStatus::Failed);

        let bruno = &grades[1];
        assert_eq!(bruno.scores, [Some(8.0), Some(9.0), None, None]);
        assert_eq!(bruno.delta_2_3, None);
        assert_eq!(bruno.pass_status, PassStatus::Passed);

        let caio = &grades[2];
        assert_eq!(caio.scores[0], None);
        assert_eq!(caio.final_average, None);
        assert_eq!(caio.pass_status, PassStatus::Failed);
    }

    #[test]
    fn reads_semicolon_sheet_with_english_headers() {
        let csv = "STUDENT;CLASS;SUBJECT;TOTAL CLASSES;TOTAL ABSENCES;ATTENDANCE PERCENT;ATTENDANCE STATUS;ABSENCES 1
Ana;9A;Math;40;10;75,0;APROVADO;3
Bia;9A;Math;;;;
";
        let records = read_attendance(csv.as_bytes(), "attendance.csv", b';').expect("attendance");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].total_classes, 40);
        assert_eq!(records[0].total_absences, 10);
        assert_eq!(records[0].attendance_percent, 75.0);
        assert_eq!(records[0].absences, [Some(3), None, None, None]);
        assert_eq!(records[0].pass_status, PassStatus::Passed);

        assert_eq!(records[1].total_classes, 0);
        assert_eq!(records[1].attendance_percent, 0.0);
        assert_eq!(records[1].pass_status, PassStatus::Failed);
    }

    #[test]
    fn sheet_without_student_column_is_rejected() {
        let csv = "NAME,CLASS\nAna,9A\n";
        let err = read_grades(csv.as_bytes(), "bad.csv", b',').expect_err("missing column");
        assert!(matches!(err, ImportError::MissingColumn { .. }));
    }

    #[test]
    fn dataset_without_attendance_sheet_has_empty_attendance() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(&mut file, GRADES_CSV.as_bytes()).expect("write");
        let dataset = read_dataset(file.path(), None, b',').expect("dataset");
        assert_eq!(dataset.grades.len(), 3);
        assert!(dataset.attendance.is_empty());
    }

    #[test]
    fn non_utf8_cells_fall_back_to_latin1() {
        let csv: &[u8] =
            b"ESTUDANTE,TURMA,DISCIPLINA,M\xC3\x89DIA FINAL\nAna,9A,Matem\xE1tica,5.5\nBia,9A,Math,7\n";
        let grades = read_grades(csv, "latin1.csv", b',').expect("grades");
        assert_eq!(grades.len(), 2);
        assert_eq!(grades[0].subject, "Matemática");
        assert_eq!(grades[0].final_average, Some(5.5));
        assert_eq!(grades[1].student, "Bia");
        assert_eq!(grades[1].final_average, Some(7.0));
    }

    #[test]
    fn latin1_headers_still_match() {
        let csv: &[u8] = b"ESTUDANTE;M\xC9DIA FINAL;SITUA\xC7\xC3O NOTA\nAna;8,5;APROVADO\n";
        let grades = read_grades(csv, "latin1.csv", b';').expect("grades");
        assert_eq!(grades[0].final_average, Some(8.5));
        assert_eq!(grades[0].pass_status, PassStatus::Passed);
    }

    #[test]
    fn workbook_cells_become_text() {
        assert_eq!(cell_text(&Data::Float(5.5)), "5.5");
        assert_eq!(cell_text(&Data::Float(7.0)), "7");
        assert_eq!(cell_text(&Data::Int(40)), "40");
        assert_eq!(cell_text(&Data::String(" Ana ".to_string())), "Ana");
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(parse_number(Some(&cell_text(&Data::Float(-1.5)))), Some(-1.5));
    }

    #[test]
    fn only_workbook_extensions_are_workbooks() {
        assert!(is_workbook(Path::new("notas.xlsx")));
        assert!(is_workbook(Path::new("NOTAS.XLS")));
        assert!(!is_workbook(Path::new("notas.csv")));
        assert!(!is_workbook(Path::new("notas")));
    }

    const GRADE_HEADERS: [&str; 6] = [
        "ESTUDANTE",
        "TURMA",
        "DISCIPLINA",
        "NOTA 1º BIMESTRE",
        "MÉDIA FINAL",
        "SITUAÇÃO NOTA",
    ];
    const ATTENDANCE_HEADERS: [&str; 7] = [
        "ESTUDANTE",
        "TURMA",
        "DISCIPLINA",
        "TOTAL DE AULAS",
        "TOTAL DE FALTAS",
        "PERCENTUAL DE PRESENÇA",
        "SITUAÇÃO PRESENÇA",
    ];

    fn write_workbook(path: &Path, with_attendance: bool) {
        use rust_xlsxwriter::Workbook;

        let mut workbook = Workbook::new();
        let grades = workbook.add_worksheet();
        for (col, header) in GRADE_HEADERS.into_iter().enumerate() {
            grades.write_string(0, col as u16, header).expect("header");
        }
        grades.write_string(1, 0, "Ana Souza").expect("cell");
        grades.write_string(1, 1, "9A").expect("cell");
        grades.write_string(1, 2, "Matemática").expect("cell");
        grades.write_number(1, 3, 6.5).expect("cell");
        grades.write_number(1, 4, 5.5).expect("cell");
        grades.write_string(1, 5, "REPROVADO").expect("cell");
        grades.write_string(2, 0, "Bruno").expect("cell");
        grades.write_string(2, 1, "9A").expect("cell");
        grades.write_string(2, 2, "Arte").expect("cell");
        grades.write_string(2, 3, "-").expect("cell");
        grades.write_number(2, 4, 8.0).expect("cell");
        grades.write_string(2, 5, "APROVADO").expect("cell");

        if with_attendance {
            let attendance = workbook.add_worksheet();
            for (col, header) in ATTENDANCE_HEADERS.into_iter().enumerate() {
                attendance.write_string(0, col as u16, header).expect("header");
            }
            attendance.write_string(1, 0, "Ana Souza").expect("cell");
            attendance.write_string(1, 1, "9A").expect("cell");
            attendance.write_string(1, 2, "Matemática").expect("cell");
            attendance.write_number(1, 3, 40.0).expect("cell");
            attendance.write_number(1, 4, 11.0).expect("cell");
            attendance.write_number(1, 5, 72.5).expect("cell");
            attendance.write_string(1, 6, "REPROVADO").expect("cell");
        }

        workbook.save(path).expect("save workbook");
    }

    #[test]
    fn workbook_maps_first_sheet_to_grades_and_second_to_attendance() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("turma.xlsx");
        write_workbook(&path, true);

        let dataset = read_dataset(&path, None, b',').expect("dataset");
        assert_eq!(dataset.grades.len(), 2);
        let ana = &dataset.grades[0];
        assert_eq!(ana.student, "Ana Souza");
        assert_eq!(ana.subject, "Matemática");
        assert_eq!(ana.scores, [Some(6.5), None, None, None]);
        assert_eq!(ana.final_average, Some(5.5));
        assert_eq!(ana.pass_status, PassStatus::Failed);
        assert_eq!(dataset.grades[1].scores[0], None);
        assert_eq!(dataset.grades[1].pass_status, PassStatus::Passed);

        assert_eq!(dataset.attendance.len(), 1);
        let record = &dataset.attendance[0];
        assert_eq!(record.total_classes, 40);
        assert_eq!(record.total_absences, 11);
        assert_eq!(record.attendance_percent, 72.5);
        assert_eq!(record.pass_status, PassStatus::Failed);
    }

    #[test]
    fn single_sheet_workbook_has_empty_attendance() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("notas.xlsx");
        write_workbook(&path, false);

        let dataset = read_dataset(&path, None, b',').expect("dataset");
        assert_eq!(dataset.grades.len(), 2);
        assert!(dataset.attendance.is_empty());
    }
}
